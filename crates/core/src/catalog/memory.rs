use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::Utc;
use uuid::Uuid;

use super::{
    matches_query, Author, Book, BookOrder, Catalog, ListOptions, ListResult, NewBook, Publisher,
    TagCount,
};
use crate::error::CatalogError;
use crate::language::LanguageTag;
use crate::normalize::name_key;

/// In-process catalog for tests and embedding. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    books: BTreeMap<i64, Book>,
    authors: Vec<Author>,
    publishers: Vec<Publisher>,
    languages: Vec<LanguageTag>,
    last_book_id: i64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn author_for(&mut self, name: &str) -> Author {
        let key = name_key(name);
        if let Some(a) = self.authors.iter().find(|a| name_key(&a.name) == key) {
            return a.clone();
        }
        let author = Author {
            id: self.authors.len() as i64 + 1,
            name: name.to_string(),
            description: None,
            image: None,
            website: None,
        };
        self.authors.push(author.clone());
        author
    }

    fn publisher_for(&mut self, name: &str) -> Publisher {
        let key = name_key(name);
        if let Some(p) = self.publishers.iter().find(|p| name_key(&p.name) == key) {
            return p.clone();
        }
        let publisher = Publisher {
            id: self.publishers.len() as i64 + 1,
            name: name.to_string(),
            description: None,
            website: None,
        };
        self.publishers.push(publisher.clone());
        publisher
    }

    fn book_mut(&mut self, id: i64) -> Result<&mut Book, CatalogError> {
        self.books.get_mut(&id).ok_or(CatalogError::NotFound(id))
    }
}

impl Catalog for MemoryCatalog {
    fn find_by_hash(&self, hash: &str) -> Result<Option<Book>, CatalogError> {
        Ok(self.books.values().find(|b| b.content_hash == hash).cloned())
    }

    fn has_original_path(&self, path: &str) -> Result<bool, CatalogError> {
        Ok(self.books.values().any(|b| b.original_path == path))
    }

    fn get(&self, id: i64) -> Result<Option<Book>, CatalogError> {
        Ok(self.books.get(&id).cloned())
    }

    fn list(&self, opts: &ListOptions) -> Result<ListResult, CatalogError> {
        let mut matching: Vec<&Book> = self
            .books
            .values()
            .rev()
            .filter(|b| opts.tag.as_ref().map_or(true, |t| b.tags.contains(t)))
            .filter(|b| opts.status.as_ref().map_or(true, |s| &b.status == s))
            .filter(|b| {
                opts.author
                    .map_or(true, |id| b.authors.iter().any(|a| a.id == id))
            })
            .filter(|b| opts.query.as_deref().map_or(true, |q| matches_query(b, q)))
            .collect();
        sort_books(&mut matching, opts.order);
        let total = matching.len();
        let limit = if opts.limit == 0 { usize::MAX } else { opts.limit };
        let entries = matching
            .into_iter()
            .skip(opts.offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(ListResult { entries, total })
    }

    fn tags(&self) -> Result<Vec<TagCount>, CatalogError> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for tag in self.books.values().flat_map(|b| b.tags.iter()) {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(name, count)| TagCount {
                name: name.to_string(),
                count,
            })
            .collect())
    }

    fn authors(&self) -> Result<Vec<Author>, CatalogError> {
        let mut authors = self.authors.clone();
        authors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(authors)
    }

    fn publishers(&self) -> Result<Vec<Publisher>, CatalogError> {
        let mut publishers = self.publishers.clone();
        publishers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(publishers)
    }

    fn get_or_create_language(&mut self, tag: &LanguageTag) -> Result<LanguageTag, CatalogError> {
        if let Some(existing) = self.languages.iter().find(|l| l.code == tag.code) {
            return Ok(existing.clone());
        }
        self.languages.push(tag.clone());
        Ok(tag.clone())
    }

    fn insert_book(&mut self, new: NewBook) -> Result<Book, CatalogError> {
        if self.books.values().any(|b| b.content_hash == new.content_hash) {
            return Err(CatalogError::DuplicateHash(new.content_hash));
        }
        let authors = new.authors.iter().map(|n| self.author_for(n)).collect();
        let publishers = new.publishers.iter().map(|n| self.publisher_for(n)).collect();
        let language = match &new.language {
            Some(tag) => Some(self.get_or_create_language(tag)?),
            None => None,
        };

        self.last_book_id += 1;
        let now = Utc::now();
        let book = Book {
            id: self.last_book_id,
            uuid: Uuid::new_v4(),
            book_file: new.book_file,
            original_path: new.original_path,
            content_hash: new.content_hash,
            mimetype: new.mimetype,
            cover_image: None,
            title: new.title,
            summary: new.summary,
            rights: new.rights,
            language,
            issued: new.issued,
            identifier: new.identifier,
            status: new.status,
            created_at: now,
            updated_at: now,
            downloads: 0,
            authors,
            publishers,
            tags: new.tags,
        };
        self.books.insert(book.id, book.clone());
        Ok(book)
    }

    fn update_storage(
        &mut self,
        id: i64,
        book_file: &str,
        original_path: &str,
    ) -> Result<Book, CatalogError> {
        let book = self.book_mut(id)?;
        book.book_file = book_file.to_string();
        book.original_path = original_path.to_string();
        book.updated_at = Utc::now();
        Ok(book.clone())
    }

    fn set_cover(&mut self, id: i64, cover: Option<&str>) -> Result<Book, CatalogError> {
        let book = self.book_mut(id)?;
        book.cover_image = cover.map(str::to_string);
        book.updated_at = Utc::now();
        Ok(book.clone())
    }

    fn delete_book(&mut self, id: i64) -> Result<Option<Book>, CatalogError> {
        Ok(self.books.remove(&id))
    }

    fn record_download(&mut self, id: i64) -> Result<u64, CatalogError> {
        let book = self.book_mut(id)?;
        book.downloads += 1;
        Ok(book.downloads)
    }
}

/// `books` arrive newest first, which is already `Latest`.
fn sort_books(books: &mut [&Book], order: BookOrder) {
    match order {
        BookOrder::Latest => {}
        BookOrder::Title => books.sort_by_cached_key(|b| (b.title.to_lowercase(), b.id)),
        BookOrder::Author => books.sort_by_cached_key(|b| {
            (
                b.authors.first().map(|a| a.name.to_lowercase()),
                b.title.to_lowercase(),
                b.id,
            )
        }),
        BookOrder::Popular => books.sort_by_key(|b| (Reverse(b.downloads), Reverse(b.id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::contract;

    #[test]
    fn memory_catalog_contract() {
        contract::run_all(|| Box::new(MemoryCatalog::new()));
    }
}
