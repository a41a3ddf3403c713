//! Binary entry point for the EPUB catalog server.
//!
//! Serves the catalog JSON API, book downloads and OPDS feeds from the
//! configured media root.

use epub_catalog_server::{api_routes, config::ServerConfig, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("epub_catalog_server=info".parse().unwrap()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Media root: {}", config.app.library.media_root.display());
    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Cannot open catalog: {}", e);
            std::process::exit(1);
        }
    };

    let app = api_routes(state.clone()).layer(tower_http::cors::CorsLayer::permissive());

    let addr = state.config.bind_addr();
    tracing::info!("Catalog server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind");
    axum::serve(listener, app).await.expect("serve");
}
