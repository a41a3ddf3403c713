//! Config file parsing for `~/.config/epub-catalog/config.toml`.
//!
//! `EPUB_CATALOG_CONFIG` points at a different file; `EPUB_CATALOG_MEDIA_ROOT`
//! and `EPUB_CATALOG_DATABASE` override the two library paths after loading.
//! Use `read_options_from_config` so the archive limits apply everywhere an
//! EPUB is opened.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::ReadOptions;
use crate::catalog::STATUS_PUBLISHED;
use crate::security::SecurityLimits;

pub const CONFIG_ENV: &str = "EPUB_CATALOG_CONFIG";
pub const MEDIA_ROOT_ENV: &str = "EPUB_CATALOG_MEDIA_ROOT";
pub const DATABASE_ENV: &str = "EPUB_CATALOG_DATABASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    /// Defaults to `catalog.sqlite3` inside the media root.
    pub database: Option<PathBuf>,
    /// Parent directory for per-archive scratch directories; system temp when unset.
    pub scratch_dir: Option<PathBuf>,
}

fn default_media_root() -> PathBuf {
    let mut p = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    p.push("epub-catalog");
    p.push("media");
    p
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            database: None,
            scratch_dir: None,
        }
    }
}

impl LibraryConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.media_root.join("catalog.sqlite3"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_status")]
    pub default_status: String,
    #[serde(default)]
    pub use_symlinks: bool,
    #[serde(default = "default_true")]
    pub skip_imported: bool,
    #[serde(default = "default_max_subject_length")]
    pub max_subject_length: usize,
}

fn default_status() -> String {
    STATUS_PUBLISHED.to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_subject_length() -> usize {
    80
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_status: default_status(),
            use_symlinks: false,
            skip_imported: true,
            max_subject_length: default_max_subject_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_books_per_page")]
    pub books_per_page: usize,
    #[serde(default = "default_true")]
    pub allow_public_browse: bool,
    #[serde(default)]
    pub allow_public_upload: bool,
    #[serde(default)]
    pub allow_public_edit: bool,
}

fn default_books_per_page() -> usize {
    50
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            books_per_page: default_books_per_page(),
            allow_public_browse: true,
            allow_public_upload: false,
            allow_public_edit: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_file_count: Option<u64>,
    pub max_resource_size_mb: Option<u64>,
    pub max_compression_ratio: Option<u64>,
}

/// Load config from `EPUB_CATALOG_CONFIG` or the default path, then apply the
/// path overrides from the environment. A missing or unparseable file yields
/// defaults.
pub fn load_config() -> AppConfig {
    let mut cfg = match config_path() {
        Some(path) => load_config_from(&path),
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut cfg);
    cfg
}

pub fn load_config_from(path: &Path) -> AppConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return AppConfig::default(),
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring unparseable config {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Some(root) = std::env::var_os(MEDIA_ROOT_ENV) {
        cfg.library.media_root = PathBuf::from(root);
    }
    if let Some(db) = std::env::var_os(DATABASE_ENV) {
        cfg.library.database = Some(PathBuf::from(db));
    }
}

/// Return the config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    if let Some(p) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }
    dirs::config_dir().map(|mut p| {
        p.push("epub-catalog");
        p.push("config.toml");
        p
    })
}

/// Build security limits from config. Uses defaults for any unset values.
pub fn security_limits_from_config(c: &SecurityConfig) -> SecurityLimits {
    let mut limits = SecurityLimits::default();
    if let Some(n) = c.max_file_count {
        limits.max_file_count = n;
    }
    if let Some(mb) = c.max_resource_size_mb {
        limits.max_resource_size_bytes = mb.saturating_mul(1024).saturating_mul(1024);
    }
    if let Some(r) = c.max_compression_ratio {
        limits.max_compression_ratio = r;
    }
    limits
}

/// Build archive read options from the full app config.
pub fn read_options_from_config(cfg: &AppConfig) -> ReadOptions {
    ReadOptions {
        security: security_limits_from_config(&cfg.security),
        scratch_dir: cfg.library.scratch_dir.clone(),
    }
}
