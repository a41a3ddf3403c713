//! EPUB catalog HTTP server.
//!
//! Exposes the catalog as a small JSON API (list, get, upload, delete),
//! serves book files and covers, and publishes OPDS 1.2 feeds for reading
//! apps. All catalog work goes through one `Library` behind a mutex.

pub mod api;
pub mod config;
pub mod opds;

use std::sync::{Arc, Mutex};

use axum::Router;
use epub_catalog_core::catalog::SqliteCatalog;
use epub_catalog_core::error::CatalogError;
use epub_catalog_core::library::Library;

use crate::config::ServerConfig;

/// Shared application state (library and config).
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<Mutex<Library<SqliteCatalog>>>,
    pub config: ServerConfig,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Result<Self, CatalogError> {
        let library = Library::open(&config.app)?;
        Ok(Self {
            library: Arc::new(Mutex::new(library)),
            config,
        })
    }
}

/// Build the API, file and OPDS routes with state.
pub fn api_routes(state: AppState) -> Router {
    api::routes(state.clone()).merge(opds::routes(state))
}
