//! Server configuration (catalog config, bind address).

use epub_catalog_core::config::{load_config, AppConfig};

pub const BIND_ENV: &str = "EPUB_CATALOG_BIND";

/// Configuration for the catalog server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Library paths, import defaults and the public access switches.
    pub app: AppConfig,
    /// Host:port to bind (e.g. "127.0.0.1:3030" or "0.0.0.0:3030").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            bind: "127.0.0.1:3030".to_string(),
        }
    }
}

impl ServerConfig {
    /// Build config from the catalog config file and the environment.
    /// - `EPUB_CATALOG_CONFIG`, `EPUB_CATALOG_MEDIA_ROOT`, `EPUB_CATALOG_DATABASE`: see the core config
    /// - `EPUB_CATALOG_BIND`: host:port (default: 127.0.0.1:3030)
    pub fn from_env() -> Self {
        let mut c = Self {
            app: load_config(),
            ..Self::default()
        };
        if let Ok(b) = std::env::var(BIND_ENV) {
            c.bind = b;
        }
        c
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind
    }
}
