//! The managed library: media storage plus the catalog that indexes it.
//!
//! A `Library` owns both halves so that every operation that touches one keeps
//! the other consistent. Ingestion lives in `ingest.rs`, batch import and
//! resync in `batch.rs`; this module holds construction and the cascading
//! operations.

use crate::archive::ReadOptions;
use crate::catalog::{Book, Catalog, SqliteCatalog};
use crate::config::{read_options_from_config, AppConfig};
use crate::error::CatalogError;
use crate::storage::MediaStorage;

pub struct Library<C: Catalog = SqliteCatalog> {
    config: AppConfig,
    storage: MediaStorage,
    catalog: C,
}

impl Library<SqliteCatalog> {
    /// Open the SQLite catalog and media root named by `config`, creating both
    /// when missing.
    pub fn open(config: &AppConfig) -> Result<Self, CatalogError> {
        std::fs::create_dir_all(&config.library.media_root)?;
        let catalog = SqliteCatalog::open(&config.library.database_path())?;
        tracing::info!(
            "Library at {} (catalog {})",
            config.library.media_root.display(),
            config.library.database_path().display()
        );
        Ok(Self::new(config.clone(), catalog))
    }
}

impl<C: Catalog> Library<C> {
    pub fn new(config: AppConfig, catalog: C) -> Self {
        let storage = MediaStorage::new(config.library.media_root.clone());
        Self {
            config,
            storage,
            catalog,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> &MediaStorage {
        &self.storage
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut C {
        &mut self.catalog
    }

    pub fn read_options(&self) -> ReadOptions {
        read_options_from_config(&self.config)
    }

    /// Whether a book with this content hash is already cataloged.
    pub fn is_duplicate(&self, hash: &str) -> Result<bool, CatalogError> {
        Ok(self.catalog.find_by_hash(hash)?.is_some())
    }

    /// Delete a book and everything it owns in storage.
    ///
    /// A linked book file only loses the link; the original is never touched.
    /// Storage errors after the record is gone are logged, not returned.
    pub fn remove(&mut self, id: i64) -> Result<Option<Book>, CatalogError> {
        let Some(book) = self.catalog.delete_book(id)? else {
            return Ok(None);
        };
        self.delete_files(&book);
        tracing::info!("Removed book #{} ({})", book.id, book.title);
        Ok(Some(book))
    }

    pub fn record_download(&mut self, id: i64) -> Result<u64, CatalogError> {
        self.catalog.record_download(id)
    }

    pub(crate) fn delete_files(&self, book: &Book) {
        let names = std::iter::once(book.book_file.as_str()).chain(book.cover_image.as_deref());
        for name in names {
            if let Err(e) = self.storage.delete(name) {
                tracing::warn!("Could not delete {} of book #{}: {}", name, book.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::fixtures::{EpubBuilder, TINY_PNG};
    use crate::storage::StorageStrategy;

    fn library(root: &std::path::Path) -> Library<MemoryCatalog> {
        let mut config = AppConfig::default();
        config.library.media_root = root.to_path_buf();
        Library::new(config, MemoryCatalog::new())
    }

    #[test]
    fn open_creates_media_root_and_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.library.media_root = dir.path().join("media");
        let lib = Library::open(&config).unwrap();
        assert!(dir.path().join("media").is_dir());
        assert!(dir.path().join("media").join("catalog.sqlite3").is_file());
        assert_eq!(lib.storage().root(), dir.path().join("media"));
    }

    #[test]
    fn remove_cascades_to_files() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let path = src.path().join("covered.epub");
        EpubBuilder::new("Covered")
            .cover_image("images/cover.png", TINY_PNG)
            .write_to(&path)
            .unwrap();

        let mut lib = library(media.path());
        let book = lib.ingest(&path, StorageStrategy::Copy).unwrap();
        let cover = book.cover_image.clone().unwrap();
        assert!(lib.storage().exists(&book.book_file));
        assert!(lib.storage().exists(&cover));

        let removed = lib.remove(book.id).unwrap().unwrap();
        assert_eq!(removed.id, book.id);
        assert!(!lib.storage().exists(&book.book_file));
        assert!(!lib.storage().exists(&cover));
        assert!(path.exists());
        assert!(lib.remove(book.id).unwrap().is_none());
    }

    #[test]
    fn downloads_and_duplicates() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let path = src.path().join("d.epub");
        EpubBuilder::new("D").write_to(&path).unwrap();

        let mut lib = library(media.path());
        let book = lib.ingest(&path, StorageStrategy::Copy).unwrap();
        assert!(lib.is_duplicate(&book.content_hash).unwrap());
        assert!(!lib.is_duplicate("0000").unwrap());
        assert_eq!(lib.record_download(book.id).unwrap(), 1);
        assert!(matches!(
            lib.record_download(book.id + 1),
            Err(CatalogError::NotFound(_))
        ));
    }
}
