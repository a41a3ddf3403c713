//! Single-file ingestion: hash, parse, store, catalog, cover.
//!
//! Nothing is left behind on failure. Files written before the failing step
//! are removed, and a record whose cover could not be attached is rolled back.

use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::archive::{EpubArchive, ReadOptions};
use crate::catalog::{Book, Catalog, NewBook};
use crate::cover::{resolve_cover, CoverImage};
use crate::error::{ArchiveError, CatalogError, IngestError};
use crate::language::{standardize, LanguageTag};
use crate::library::Library;
use crate::normalize::{authors_from_creators, normalize_publishers, normalize_tags};
use crate::package::{parse_package, PackageMetadata};
use crate::storage::{absolute, content_hash, Bucket, StorageStrategy, StoredFile};

/// Everything read out of an EPUB before the archive is closed.
#[derive(Debug, Serialize)]
pub struct ParsedEpub {
    pub metadata: PackageMetadata,
    pub mimetype: String,
    pub opf_path: String,
    pub ncx_path: Option<String>,
    #[serde(skip)]
    pub cover: Option<CoverImage>,
}

/// Open `path`, read its package metadata and copy out the cover.
///
/// The archive and its scratch directory are released on every path.
pub fn parse_epub(path: &Path, opts: &ReadOptions) -> Result<ParsedEpub, ArchiveError> {
    let mut archive = EpubArchive::open(path, opts)?;
    let parsed = read_archive(&mut archive, opts);
    archive.close();
    parsed
}

fn read_archive(
    archive: &mut EpubArchive<File>,
    opts: &ReadOptions,
) -> Result<ParsedEpub, ArchiveError> {
    let metadata = parse_package(archive.package_document())?;
    let cover = resolve_cover(&metadata, archive).and_then(|extracted| {
        CoverImage::copy_from(&extracted, opts.scratch_dir.as_deref())
            .map_err(|e| tracing::warn!("Could not keep cover {}: {}", extracted.display(), e))
            .ok()
    });
    Ok(ParsedEpub {
        metadata,
        mimetype: archive.mimetype().to_string(),
        opf_path: archive.opf_path().to_string(),
        ncx_path: archive.ncx_path().map(str::to_string),
        cover,
    })
}

/// Language of the package as a catalog tag; invalid codes leave it unset.
pub fn resolve_language(raw: Option<&str>) -> Option<LanguageTag> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match standardize(raw) {
        Ok(tag) => Some(tag),
        Err(e) => {
            tracing::warn!("Leaving language unset: {}", e);
            None
        }
    }
}

impl<C: Catalog> Library<C> {
    /// Ingest a file from disk, recording its absolute path as the original.
    pub fn ingest(&mut self, path: &Path, strategy: StorageStrategy) -> Result<Book, IngestError> {
        let original = absolute(path).map_err(|e| IngestError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book.epub".to_string());
        self.ingest_named(path, &file_name, &original.to_string_lossy(), strategy)
    }

    /// Ingest `path` but store it as `file_name` and record `original_path`.
    ///
    /// Used for uploads, where the bytes sit in a temporary file.
    pub fn ingest_named(
        &mut self,
        path: &Path,
        file_name: &str,
        original_path: &str,
        strategy: StorageStrategy,
    ) -> Result<Book, IngestError> {
        let read_err = |e| IngestError::Read {
            path: path.to_path_buf(),
            source: e,
        };
        let hash = content_hash(File::open(path).map_err(read_err)?).map_err(read_err)?;
        tracing::debug!("{} hashes to {}", path.display(), hash);

        if let Some(existing) = self.catalog().find_by_hash(&hash)? {
            return Err(IngestError::Duplicate {
                hash,
                existing: Some(existing.id),
            });
        }

        let parsed = parse_epub(path, &self.read_options())?;
        let new = self.new_book(&parsed, file_name, original_path, &hash);

        let stored = self.storage().persist(Bucket::Books, file_name, path, strategy)?;
        tracing::debug!("Stored {} as {} (linked: {})", path.display(), stored.name, stored.linked);

        let new = NewBook {
            book_file: stored.name.clone(),
            ..new
        };
        let book = self.insert_stored(new, &stored)?;

        let book = match parsed.cover {
            Some(cover) => self.attach_cover(book, &cover)?,
            None => book,
        };
        tracing::info!("Imported book #{} ({})", book.id, book.title);
        Ok(book)
    }

    fn new_book(
        &self,
        parsed: &ParsedEpub,
        file_name: &str,
        original_path: &str,
        hash: &str,
    ) -> NewBook {
        let meta = &parsed.metadata;
        let import = &self.config().import;
        let title = meta
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                Path::new(file_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file_name.to_string())
            });

        NewBook {
            book_file: String::new(),
            original_path: original_path.to_string(),
            content_hash: hash.to_string(),
            mimetype: Some(parsed.mimetype.clone()),
            title,
            summary: meta.summary.clone(),
            rights: meta.rights.clone(),
            language: resolve_language(meta.language.as_deref()),
            issued: meta.date.clone(),
            identifier: meta.identifier.as_ref().map(|i| i.value.clone()),
            status: import.default_status.clone(),
            authors: authors_from_creators(&meta.creators),
            publishers: normalize_publishers(&meta.publishers),
            tags: normalize_tags(&meta.subjects, import.max_subject_length),
        }
    }

    fn insert_stored(&mut self, new: NewBook, stored: &StoredFile) -> Result<Book, IngestError> {
        let language = match &new.language {
            Some(tag) => match self.catalog_mut().get_or_create_language(tag) {
                Ok(stored_tag) => Some(stored_tag),
                Err(e) => {
                    self.discard(&stored.name);
                    return Err(e.into());
                }
            },
            None => None,
        };
        let new = NewBook { language, ..new };

        match self.catalog_mut().insert_book(new) {
            Ok(book) => Ok(book),
            Err(CatalogError::DuplicateHash(hash)) => {
                // Lost a race against another ingestion of the same content.
                self.discard(&stored.name);
                let existing = self
                    .catalog()
                    .find_by_hash(&hash)
                    .ok()
                    .flatten()
                    .map(|b| b.id);
                Err(IngestError::Duplicate { hash, existing })
            }
            Err(e) => {
                self.discard(&stored.name);
                Err(e.into())
            }
        }
    }

    fn attach_cover(&mut self, book: Book, cover: &CoverImage) -> Result<Book, IngestError> {
        let name = format!("{}{}", book.id, cover.extension());
        let stored = match self.storage().persist(
            Bucket::Covers,
            &name,
            cover.path(),
            StorageStrategy::Copy,
        ) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Keeping book #{} without cover: {}", book.id, e);
                return Ok(book);
            }
        };

        match self.catalog_mut().set_cover(book.id, Some(&stored.name)) {
            Ok(book) => Ok(book),
            Err(e) => {
                tracing::warn!("Rolling back book #{}: {}", book.id, e);
                if let Err(del) = self.catalog_mut().delete_book(book.id) {
                    tracing::warn!("Rollback of book #{} failed: {}", book.id, del);
                }
                self.discard(&book.book_file);
                self.discard(&stored.name);
                Err(e.into())
            }
        }
    }

    fn discard(&self, name: &str) {
        if let Err(e) = self.storage().delete(name) {
            tracing::warn!("Could not remove {}: {}", name, e);
        }
    }
}
