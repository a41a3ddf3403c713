//! JSON API and file routes.

use std::io::Write;
use std::path::Path as FsPath;
use std::sync::MutexGuard;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use epub_catalog_core::catalog::{
    Author, Book, BookOrder, Catalog, ListOptions, Publisher, SqliteCatalog, STATUS_PUBLISHED,
};
use epub_catalog_core::error::{CatalogError, IngestError, StorageError};
use epub_catalog_core::library::Library;
use epub_catalog_core::storage::StorageStrategy;

use crate::AppState;

pub(crate) const EPUB_MIME: &str = "application/epub+zip";

/// Query params for GET /api/books
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub q: Option<String>,
    pub tag: Option<String>,
    pub author: Option<i64>,
    /// `latest` (default), `title`, `author` or `popular`.
    pub sort: Option<BookOrder>,
}

/// Query params for POST /api/books
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

/// One page of the catalog.
#[derive(Debug, Serialize)]
pub struct BookPage {
    pub books: Vec<Book>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/books", get(list_books).post(upload_book))
        .route("/api/books/:id", get(get_book).delete(delete_book))
        .route("/api/authors", get(list_authors))
        .route("/api/publishers", get(list_publishers))
        .route("/books/:id/download", get(download_book))
        .route("/books/:id/cover", get(get_cover))
        .with_state(state)
}

impl AppState {
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Library<SqliteCatalog>>, ApiError> {
        self.library
            .lock()
            .map_err(|_| ApiError::Internal("library lock poisoned".to_string()))
    }

    pub(crate) fn require_browse(&self) -> Result<(), ApiError> {
        if self.config.app.catalog.allow_public_browse {
            Ok(())
        } else {
            Err(ApiError::Forbidden("browsing is disabled"))
        }
    }
}

/// Paging for `page` (1-based, clamped to at least 1) over published books.
///
/// Anonymous readers only ever see published books; pages past the end are
/// empty.
pub(crate) fn page_options(page: Option<usize>, per_page: usize) -> (usize, ListOptions) {
    let page = page.unwrap_or(1).max(1);
    let opts = ListOptions {
        offset: (page - 1).saturating_mul(per_page),
        limit: per_page,
        status: Some(STATUS_PUBLISHED.to_string()),
        ..ListOptions::default()
    };
    (page, opts)
}

pub(crate) fn page_count(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        1
    } else {
        total.div_ceil(per_page).max(1)
    }
}

async fn list_books(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<BookPage>, ApiError> {
    state.require_browse()?;
    let per_page = state.config.app.catalog.books_per_page;
    let (page, mut opts) = page_options(q.page, per_page);
    opts.query = q.q.filter(|s| !s.trim().is_empty());
    opts.tag = q.tag.filter(|s| !s.trim().is_empty());
    opts.author = q.author;
    opts.order = q.sort.unwrap_or_default();
    let result = state.lock()?.catalog().list(&opts)?;
    Ok(Json(BookPage {
        pages: page_count(result.total, per_page),
        total: result.total,
        books: result.entries,
        page,
    }))
}

async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Book>, ApiError> {
    state.require_browse()?;
    let book = state.lock()?.catalog().get(id)?;
    book.map(Json).ok_or(ApiError::NotFound(format!("book #{id}")))
}

async fn list_authors(State(state): State<AppState>) -> Result<Json<Vec<Author>>, ApiError> {
    state.require_browse()?;
    let authors = state.lock()?.catalog().authors()?;
    Ok(Json(authors))
}

async fn list_publishers(
    State(state): State<AppState>,
) -> Result<Json<Vec<Publisher>>, ApiError> {
    state.require_browse()?;
    let publishers = state.lock()?.catalog().publishers()?;
    Ok(Json(publishers))
}

async fn delete_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.config.app.catalog.allow_public_edit {
        return Err(ApiError::Forbidden("editing is disabled"));
    }
    match state.lock()?.remove(id)? {
        Some(book) => {
            tracing::info!("Deleted book #{} ({})", book.id, book.title);
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::NotFound(format!("book #{id}"))),
    }
}

async fn upload_book(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<Book>), ApiError> {
    if !state.config.app.catalog.allow_public_upload {
        return Err(ApiError::Forbidden("uploads are disabled"));
    }
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".to_string()));
    }
    let file_name = upload_name(q.filename.as_deref());

    // Removed on drop, whichever way ingestion goes.
    let mut temp = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".epub")
        .tempfile()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    temp.write_all(&body)
        .and_then(|_| temp.flush())
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let result = state
        .lock()?
        .ingest_named(temp.path(), &file_name, &file_name, StorageStrategy::Copy);
    match result {
        Ok(book) => Ok((StatusCode::CREATED, Json(book))),
        Err(e @ IngestError::Duplicate { .. }) => {
            tracing::info!("Rejected upload {}: {}", file_name, e);
            Err(ApiError::Conflict("The file is already on the database".to_string()))
        }
        Err(IngestError::InvalidEpub(e)) => {
            tracing::info!("Rejected upload {}: {}", file_name, e);
            Err(ApiError::Unprocessable(e.to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// The last path component of the client's name, `upload.epub` when absent.
fn upload_name(raw: Option<&str>) -> String {
    raw.map(|s| s.replace('\\', "/"))
        .as_deref()
        .and_then(|s| FsPath::new(s).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload.epub".to_string())
}

async fn download_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.require_browse()?;
    let mut library = state.lock()?;
    let book = library
        .catalog()
        .get(id)?
        .ok_or(ApiError::NotFound(format!("book #{id}")))?;
    let data = read_stored(&library, &book.book_file)?;
    library.record_download(id)?;

    let name = FsPath::new(&book.book_file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{id}.epub"));
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(&name, NON_ALPHANUMERIC)
    );
    Ok((
        [
            (header::CONTENT_TYPE, EPUB_MIME.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

async fn get_cover(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.require_browse()?;
    let library = state.lock()?;
    let book = library
        .catalog()
        .get(id)?
        .ok_or(ApiError::NotFound(format!("book #{id}")))?;
    let cover = book
        .cover_image
        .ok_or(ApiError::NotFound(format!("cover of book #{id}")))?;
    let data = read_stored(&library, &cover)?;
    Ok(([(header::CONTENT_TYPE, image_mime(&cover))], data).into_response())
}

fn read_stored(library: &Library<SqliteCatalog>, name: &str) -> Result<Vec<u8>, ApiError> {
    let path = library.storage().path(name)?;
    std::fs::read(&path).map_err(|e| {
        tracing::warn!("Cannot read {}: {}", path.display(), e);
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(format!("file {name}"))
        } else {
            ApiError::Internal(e.to_string())
        }
    })
}

pub(crate) fn image_mime(name: &str) -> &'static str {
    let ext = FsPath::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[derive(Debug)]
pub(crate) enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(&'static str),
    Conflict(String),
    Unprocessable(String),
    Internal(String),
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(id) => ApiError::NotFound(format!("book #{id}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(s) => (StatusCode::NOT_FOUND, format!("not found: {s}")),
            ApiError::BadRequest(s) => (StatusCode::BAD_REQUEST, s),
            ApiError::Forbidden(s) => (StatusCode::FORBIDDEN, s.to_string()),
            ApiError::Conflict(s) => (StatusCode::CONFLICT, s),
            ApiError::Unprocessable(s) => (StatusCode::UNPROCESSABLE_ENTITY, s),
            ApiError::Internal(s) => {
                tracing::error!("{}", s);
                (StatusCode::INTERNAL_SERVER_ERROR, s)
            }
        };
        (status, body).into_response()
    }
}
