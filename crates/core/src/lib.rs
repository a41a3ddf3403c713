pub mod archive;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod cover;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod ingest;
pub mod language;
pub mod library;
pub mod normalize;
pub mod package;
pub mod progress;
pub mod security;
pub mod storage;
pub mod xml;

pub mod prelude {
    pub use crate::archive::{EpubArchive, ReadOptions};
    pub use crate::batch::{import, resync, ImportReport, ReplaceStrategy, ResyncReport};
    pub use crate::catalog::{Book, Catalog, ListOptions, MemoryCatalog, SqliteCatalog};
    pub use crate::config::AppConfig;
    pub use crate::error::*;
    pub use crate::ingest::{parse_epub, ParsedEpub};
    pub use crate::library::Library;
    pub use crate::storage::StorageStrategy;
}
