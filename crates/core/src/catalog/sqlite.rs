use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, Connection, ErrorCode, Row, Transaction};
use uuid::Uuid;

use super::{
    Author, Book, BookOrder, Catalog, ListOptions, ListResult, NewBook, Publisher, TagCount,
};
use crate::error::CatalogError;
use crate::language::LanguageTag;
use crate::normalize::name_key;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS languages (
    id          INTEGER PRIMARY KEY,
    code        TEXT NOT NULL UNIQUE,
    label       TEXT NOT NULL,
    long_name   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS authors (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    name_key    TEXT NOT NULL UNIQUE,
    description TEXT,
    image       TEXT,
    website     TEXT
);

CREATE TABLE IF NOT EXISTS publishers (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    name_key    TEXT NOT NULL UNIQUE,
    description TEXT,
    website     TEXT
);

CREATE TABLE IF NOT EXISTS books (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid          TEXT NOT NULL UNIQUE,
    book_file     TEXT NOT NULL,
    original_path TEXT NOT NULL,
    content_hash  TEXT NOT NULL UNIQUE,
    mimetype      TEXT,
    cover_image   TEXT,
    title         TEXT NOT NULL,
    summary       TEXT,
    rights        TEXT,
    language_id   INTEGER REFERENCES languages(id),
    issued        TEXT,
    identifier    TEXT,
    status        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    downloads     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_books_original_path ON books(original_path);

CREATE TABLE IF NOT EXISTS book_authors (
    book_id   INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    author_id INTEGER NOT NULL REFERENCES authors(id),
    position  INTEGER NOT NULL,
    PRIMARY KEY (book_id, author_id)
);

CREATE TABLE IF NOT EXISTS book_publishers (
    book_id      INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    publisher_id INTEGER NOT NULL REFERENCES publishers(id),
    position     INTEGER NOT NULL,
    PRIMARY KEY (book_id, publisher_id)
);

CREATE TABLE IF NOT EXISTS book_tags (
    book_id  INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    tag      TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (book_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_book_tags_tag ON book_tags(tag);
"#;

const BOOK_COLUMNS: &str = "b.id, b.uuid, b.book_file, b.original_path, b.content_hash, \
     b.mimetype, b.cover_image, b.title, b.summary, b.rights, b.issued, b.identifier, \
     b.status, b.created_at, b.updated_at, b.downloads, l.code, l.label, l.long_name";

/// Catalog persisted in a SQLite database.
pub struct SqliteCatalog {
    conn: Connection,
}

impl std::fmt::Debug for SqliteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCatalog")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl SqliteCatalog {
    /// Open (or create) the database at `path` and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!("Opened catalog database {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CatalogError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn load_book(conn: &Connection, id: i64) -> Result<Option<Book>, CatalogError> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books b \
             LEFT JOIN languages l ON l.id = b.language_id WHERE b.id = ?1"
        );
        let book = match conn.query_row(&sql, params![id], parse_book_row) {
            Ok(b) => b,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Self::with_relations(conn, book)?))
    }

    fn require_book(conn: &Connection, id: i64) -> Result<Book, CatalogError> {
        Self::load_book(conn, id)?.ok_or(CatalogError::NotFound(id))
    }

    fn with_relations(conn: &Connection, mut book: Book) -> Result<Book, CatalogError> {
        let mut stmt = conn.prepare_cached(
            "SELECT a.id, a.name, a.description, a.image, a.website FROM authors a \
             JOIN book_authors ba ON ba.author_id = a.id \
             WHERE ba.book_id = ?1 ORDER BY ba.position",
        )?;
        book.authors = stmt
            .query_map(params![book.id], parse_author_row)?
            .collect::<Result<_, _>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT p.id, p.name, p.description, p.website FROM publishers p \
             JOIN book_publishers bp ON bp.publisher_id = p.id \
             WHERE bp.book_id = ?1 ORDER BY bp.position",
        )?;
        book.publishers = stmt
            .query_map(params![book.id], parse_publisher_row)?
            .collect::<Result<_, _>>()?;

        let mut stmt = conn
            .prepare_cached("SELECT tag FROM book_tags WHERE book_id = ?1 ORDER BY position")?;
        book.tags = stmt
            .query_map(params![book.id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(book)
    }

    fn language_id(tx: &Transaction<'_>, tag: &LanguageTag) -> Result<i64, CatalogError> {
        tx.execute(
            "INSERT OR IGNORE INTO languages (code, label, long_name) VALUES (?1, ?2, ?3)",
            params![tag.code, tag.label, tag.long_name],
        )?;
        Ok(tx.query_row(
            "SELECT id FROM languages WHERE code = ?1",
            params![tag.code],
            |r| r.get(0),
        )?)
    }

    fn named_id(tx: &Transaction<'_>, table: &str, name: &str) -> Result<i64, CatalogError> {
        let key = name_key(name);
        tx.execute(
            &format!("INSERT OR IGNORE INTO {table} (name, name_key) VALUES (?1, ?2)"),
            params![name, key],
        )?;
        Ok(tx.query_row(
            &format!("SELECT id FROM {table} WHERE name_key = ?1"),
            params![key],
            |r| r.get(0),
        )?)
    }

    fn touch(&self, id: i64, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Book, CatalogError> {
        let changed = self.conn.execute(sql, args)?;
        if changed == 0 {
            return Err(CatalogError::NotFound(id));
        }
        Self::require_book(&self.conn, id)
    }
}

fn parse_book_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    let uuid_text: String = row.get(1)?;
    let uuid = Uuid::parse_str(&uuid_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let code: Option<String> = row.get(16)?;
    let language = match code {
        Some(code) => Some(LanguageTag {
            code,
            label: row.get(17)?,
            long_name: row.get(18)?,
        }),
        None => None,
    };
    let downloads: i64 = row.get(15)?;
    Ok(Book {
        id: row.get(0)?,
        uuid,
        book_file: row.get(2)?,
        original_path: row.get(3)?,
        content_hash: row.get(4)?,
        mimetype: row.get(5)?,
        cover_image: row.get(6)?,
        title: row.get(7)?,
        summary: row.get(8)?,
        rights: row.get(9)?,
        language,
        issued: row.get(10)?,
        identifier: row.get(11)?,
        status: row.get(12)?,
        created_at: row.get::<_, DateTime<Utc>>(13)?,
        updated_at: row.get::<_, DateTime<Utc>>(14)?,
        downloads: downloads.max(0) as u64,
        authors: Vec::new(),
        publishers: Vec::new(),
        tags: Vec::new(),
    })
}

fn parse_author_row(row: &Row<'_>) -> rusqlite::Result<Author> {
    Ok(Author {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        image: row.get(3)?,
        website: row.get(4)?,
    })
}

fn parse_publisher_row(row: &Row<'_>) -> rusqlite::Result<Publisher> {
    Ok(Publisher {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        website: row.get(3)?,
    })
}

fn is_hash_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            e.code == ErrorCode::ConstraintViolation
                && msg.as_deref().is_some_and(|m| m.contains("content_hash"))
        }
        _ => false,
    }
}

/// `LIKE` pattern matching `needle` anywhere, with wildcards escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn order_by(order: BookOrder) -> &'static str {
    match order {
        BookOrder::Latest => "b.id DESC",
        BookOrder::Title => "b.title COLLATE NOCASE, b.id",
        BookOrder::Author => {
            "(SELECT a.name FROM book_authors ba JOIN authors a ON a.id = ba.author_id \
             WHERE ba.book_id = b.id ORDER BY ba.position LIMIT 1) COLLATE NOCASE, \
             b.title COLLATE NOCASE, b.id"
        }
        BookOrder::Popular => "b.downloads DESC, b.id DESC",
    }
}

fn sql_bound(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Catalog for SqliteCatalog {
    fn find_by_hash(&self, hash: &str) -> Result<Option<Book>, CatalogError> {
        match self.conn.query_row(
            "SELECT id FROM books WHERE content_hash = ?1",
            params![hash],
            |r| r.get::<_, i64>(0),
        ) {
            Ok(id) => Self::load_book(&self.conn, id),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has_original_path(&self, path: &str) -> Result<bool, CatalogError> {
        let found: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM books WHERE original_path = ?1)",
            params![path],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    fn get(&self, id: i64) -> Result<Option<Book>, CatalogError> {
        Self::load_book(&self.conn, id)
    }

    fn list(&self, opts: &ListOptions) -> Result<ListResult, CatalogError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(tag) = &opts.tag {
            args.push(Value::Text(tag.clone()));
            clauses.push(
                "EXISTS (SELECT 1 FROM book_tags t WHERE t.book_id = b.id AND t.tag = ?)",
            );
        }
        if let Some(status) = &opts.status {
            args.push(Value::Text(status.clone()));
            clauses.push("b.status = ?");
        }
        if let Some(author) = opts.author {
            args.push(Value::Integer(author));
            clauses.push(
                "EXISTS (SELECT 1 FROM book_authors fa WHERE fa.book_id = b.id AND fa.author_id = ?)",
            );
        }
        if let Some(query) = &opts.query {
            let pattern = like_pattern(query);
            args.push(Value::Text(pattern.clone()));
            args.push(Value::Text(pattern));
            clauses.push(
                "(b.title LIKE ? ESCAPE '\\' OR EXISTS (SELECT 1 FROM book_authors ba \
                 JOIN authors a ON a.id = ba.author_id \
                 WHERE ba.book_id = b.id AND a.name LIKE ? ESCAPE '\\'))",
            );
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM books b{filter}"),
            rusqlite::params_from_iter(args.iter()),
            |r| r.get(0),
        )?;

        // SQLite takes signed 64-bit bounds; larger offsets just yield nothing.
        let limit = if opts.limit == 0 { -1 } else { sql_bound(opts.limit) };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT b.id FROM books b{filter} ORDER BY {} LIMIT {limit} OFFSET {}",
            order_by(opts.order),
            sql_bound(opts.offset)
        ))?;
        let ids: Vec<i64> = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |r| r.get(0))?
            .collect::<Result<_, _>>()?;

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(book) = Self::load_book(&self.conn, id)? {
                entries.push(book);
            }
        }
        Ok(ListResult {
            entries,
            total: total.max(0) as usize,
        })
    }

    fn tags(&self) -> Result<Vec<TagCount>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag, COUNT(*) FROM book_tags GROUP BY tag ORDER BY tag")?;
        let tags = stmt
            .query_map([], |r| {
                Ok(TagCount {
                    name: r.get(0)?,
                    count: r.get::<_, i64>(1)?.max(0) as usize,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(tags)
    }

    fn authors(&self) -> Result<Vec<Author>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, image, website FROM authors ORDER BY name",
        )?;
        let authors = stmt.query_map([], parse_author_row)?.collect::<Result<_, _>>()?;
        Ok(authors)
    }

    fn publishers(&self) -> Result<Vec<Publisher>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description, website FROM publishers ORDER BY name")?;
        let publishers = stmt
            .query_map([], parse_publisher_row)?
            .collect::<Result<_, _>>()?;
        Ok(publishers)
    }

    fn get_or_create_language(&mut self, tag: &LanguageTag) -> Result<LanguageTag, CatalogError> {
        let tx = self.conn.transaction()?;
        let id = Self::language_id(&tx, tag)?;
        let stored = tx.query_row(
            "SELECT code, label, long_name FROM languages WHERE id = ?1",
            params![id],
            |r| {
                Ok(LanguageTag {
                    code: r.get(0)?,
                    label: r.get(1)?,
                    long_name: r.get(2)?,
                })
            },
        )?;
        tx.commit()?;
        Ok(stored)
    }

    fn insert_book(&mut self, new: NewBook) -> Result<Book, CatalogError> {
        let tx = self.conn.transaction()?;
        let language_id = match &new.language {
            Some(tag) => Some(Self::language_id(&tx, tag)?),
            None => None,
        };
        let now = Utc::now();
        let inserted = tx.execute(
            "INSERT INTO books (uuid, book_file, original_path, content_hash, mimetype, \
             title, summary, rights, language_id, issued, identifier, status, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                Uuid::new_v4().to_string(),
                new.book_file,
                new.original_path,
                new.content_hash,
                new.mimetype,
                new.title,
                new.summary,
                new.rights,
                language_id,
                new.issued,
                new.identifier,
                new.status,
                now,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_hash_conflict(&e) => {
                return Err(CatalogError::DuplicateHash(new.content_hash));
            }
            Err(e) => return Err(e.into()),
        }
        let id = tx.last_insert_rowid();

        for (position, name) in new.authors.iter().enumerate() {
            let author_id = Self::named_id(&tx, "authors", name)?;
            tx.execute(
                "INSERT OR IGNORE INTO book_authors (book_id, author_id, position) \
                 VALUES (?1, ?2, ?3)",
                params![id, author_id, position as i64],
            )?;
        }
        for (position, name) in new.publishers.iter().enumerate() {
            let publisher_id = Self::named_id(&tx, "publishers", name)?;
            tx.execute(
                "INSERT OR IGNORE INTO book_publishers (book_id, publisher_id, position) \
                 VALUES (?1, ?2, ?3)",
                params![id, publisher_id, position as i64],
            )?;
        }
        for (position, tag) in new.tags.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO book_tags (book_id, tag, position) VALUES (?1, ?2, ?3)",
                params![id, tag, position as i64],
            )?;
        }
        tx.commit()?;

        tracing::debug!("Inserted book #{} ({})", id, new.title);
        Self::require_book(&self.conn, id)
    }

    fn update_storage(
        &mut self,
        id: i64,
        book_file: &str,
        original_path: &str,
    ) -> Result<Book, CatalogError> {
        self.touch(
            id,
            "UPDATE books SET book_file = ?1, original_path = ?2, updated_at = ?3 WHERE id = ?4",
            params![book_file, original_path, Utc::now(), id],
        )
    }

    fn set_cover(&mut self, id: i64, cover: Option<&str>) -> Result<Book, CatalogError> {
        self.touch(
            id,
            "UPDATE books SET cover_image = ?1, updated_at = ?2 WHERE id = ?3",
            params![cover, Utc::now(), id],
        )
    }

    fn delete_book(&mut self, id: i64) -> Result<Option<Book>, CatalogError> {
        let Some(book) = Self::load_book(&self.conn, id)? else {
            return Ok(None);
        };
        self.conn.execute("DELETE FROM books WHERE id = ?1", params![id])?;
        Ok(Some(book))
    }

    fn record_download(&mut self, id: i64) -> Result<u64, CatalogError> {
        let changed = self.conn.execute(
            "UPDATE books SET downloads = downloads + 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(id));
        }
        let downloads: i64 =
            self.conn
                .query_row("SELECT downloads FROM books WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })?;
        Ok(downloads.max(0) as u64)
    }
}
