//! The catalog of books, authors, publishers, languages and tags.
//!
//! `Catalog` is the repository interface the ingestion pipeline, batch tools
//! and server talk to. The content-hash uniqueness it enforces is the final
//! arbiter between racing ingestions of the same file.

mod memory;
mod sqlite;

pub use memory::MemoryCatalog;
pub use sqlite::SqliteCatalog;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::language::LanguageTag;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
}

/// A catalog entry. Owns `book_file` and `cover_image` in managed storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    /// Stable identity for Atom feeds.
    pub uuid: Uuid,
    /// Storage name of the book file (`books/...`), a copy or a link.
    pub book_file: String,
    /// Where the file was imported from.
    pub original_path: String,
    pub content_hash: String,
    pub mimetype: Option<String>,
    /// Storage name of the cover (`covers/{id}.ext`).
    pub cover_image: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub rights: Option<String>,
    pub language: Option<LanguageTag>,
    pub issued: Option<String>,
    pub identifier: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub downloads: u64,
    pub authors: Vec<Author>,
    pub publishers: Vec<Publisher>,
    pub tags: Vec<String>,
}

/// Everything needed to create a `Book`; related entities are given by name
/// and resolved (or created) inside the same atomic insert.
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub book_file: String,
    pub original_path: String,
    pub content_hash: String,
    pub mimetype: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub rights: Option<String>,
    pub language: Option<LanguageTag>,
    pub issued: Option<String>,
    pub identifier: Option<String>,
    pub status: String,
    pub authors: Vec<String>,
    pub publishers: Vec<String>,
    pub tags: Vec<String>,
}

/// Status given to books that anonymous readers may browse.
pub const STATUS_PUBLISHED: &str = "Published";

/// Listing order. Ties fall back to the book id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookOrder {
    /// Newest first.
    #[default]
    Latest,
    /// Title, case-insensitive.
    Title,
    /// Name of the first author, then title. Books without authors come first.
    Author,
    /// Most downloaded first.
    Popular,
}

impl FromStr for BookOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "title" => Ok(Self::Title),
            "author" => Ok(Self::Author),
            "popular" => Ok(Self::Popular),
            other => Err(format!(
                "unknown order {other:?} (expected latest, title, author or popular)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub offset: usize,
    /// `0` means no limit.
    pub limit: usize,
    /// Case-insensitive match against titles and author names.
    pub query: Option<String>,
    pub tag: Option<String>,
    /// Only books credited to this author id.
    pub author: Option<i64>,
    /// Only books with exactly this status.
    pub status: Option<String>,
    pub order: BookOrder,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub entries: Vec<Book>,
    /// Matches before paging.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

pub trait Catalog: Send {
    fn find_by_hash(&self, hash: &str) -> Result<Option<Book>, CatalogError>;

    fn has_original_path(&self, path: &str) -> Result<bool, CatalogError>;

    fn get(&self, id: i64) -> Result<Option<Book>, CatalogError>;

    /// Filtered and paged, in `opts.order`.
    fn list(&self, opts: &ListOptions) -> Result<ListResult, CatalogError>;

    /// Tags in use, alphabetically.
    fn tags(&self) -> Result<Vec<TagCount>, CatalogError>;

    fn authors(&self) -> Result<Vec<Author>, CatalogError>;

    fn publishers(&self) -> Result<Vec<Publisher>, CatalogError>;

    /// Return the stored language with `tag.code`, creating it from `tag` if absent.
    fn get_or_create_language(&mut self, tag: &LanguageTag) -> Result<LanguageTag, CatalogError>;

    /// Insert the book with its authors, publishers and tags atomically.
    ///
    /// Fails with `CatalogError::DuplicateHash` when the content hash exists.
    fn insert_book(&mut self, book: NewBook) -> Result<Book, CatalogError>;

    fn update_storage(
        &mut self,
        id: i64,
        book_file: &str,
        original_path: &str,
    ) -> Result<Book, CatalogError>;

    fn set_cover(&mut self, id: i64, cover: Option<&str>) -> Result<Book, CatalogError>;

    /// Remove the record and return it so the caller can clean up its files.
    fn delete_book(&mut self, id: i64) -> Result<Option<Book>, CatalogError>;

    /// Increment and return the download counter.
    fn record_download(&mut self, id: i64) -> Result<u64, CatalogError>;
}

pub(crate) fn matches_query(book: &Book, query: &str) -> bool {
    let q = query.to_lowercase();
    book.title.to_lowercase().contains(&q)
        || book.authors.iter().any(|a| a.name.to_lowercase().contains(&q))
}
