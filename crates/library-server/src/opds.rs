//! OPDS 1.2 catalog feeds.
//!
//! `/opds` is the navigation root. `/opds/books` (newest first),
//! `/opds/titles`, `/opds/popular`, `/opds/tags/:tag` and `/opds/authors/:id`
//! are paged acquisition feeds of published books with `next`/`previous`
//! links. Entries point at `/books/:id/download` and `/books/:id/cover`.

use std::io::Cursor;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;

use epub_catalog_core::catalog::{Book, BookOrder, Catalog, ListOptions};

use crate::api::{image_mime, page_count, page_options, ApiError, EPUB_MIME};
use crate::AppState;

/// OPDS link relations
pub mod rel {
    pub const SELF: &str = "self";
    pub const START: &str = "start";
    pub const UP: &str = "up";
    pub const SUBSECTION: &str = "subsection";
    pub const ACQUISITION: &str = "http://opds-spec.org/acquisition";
    pub const IMAGE: &str = "http://opds-spec.org/image";
    pub const THUMBNAIL: &str = "http://opds-spec.org/image/thumbnail";
    pub const NEXT: &str = "next";
    pub const PREVIOUS: &str = "previous";
}

/// MIME types for OPDS
pub mod mime {
    pub const NAVIGATION: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
    pub const ACQUISITION: &str = "application/atom+xml;profile=opds-catalog;kind=acquisition";
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/opds", get(root))
        .route("/opds/books", get(books))
        .route("/opds/titles", get(titles))
        .route("/opds/popular", get(popular))
        .route("/opds/tags", get(tags))
        .route("/opds/tags/:tag", get(tagged))
        .route("/opds/authors", get(authors))
        .route("/opds/authors/:id", get(by_author))
        .with_state(state)
}

#[derive(Debug, Clone)]
pub struct Link {
    pub href: String,
    pub rel: &'static str,
    pub kind: String,
    pub title: Option<String>,
}

impl Link {
    fn new(href: impl Into<String>, rel: &'static str, kind: &str) -> Self {
        Self {
            href: href.into(),
            rel,
            kind: kind.to_string(),
            title: None,
        }
    }
}

/// An Atom entry: either a navigation subsection or a book.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub updated: DateTime<Utc>,
    pub authors: Vec<String>,
    pub language: Option<String>,
    pub issued: Option<String>,
    pub publisher: Option<String>,
    pub categories: Vec<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub links: Vec<Link>,
}

impl Entry {
    fn navigation(id: &str, title: &str, content: &str, href: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            updated: Utc::now(),
            authors: Vec::new(),
            language: None,
            issued: None,
            publisher: None,
            categories: Vec::new(),
            summary: None,
            content: Some(content.to_string()),
            links: vec![Link::new(href, rel::SUBSECTION, kind)],
        }
    }

    fn from_book(book: &Book) -> Self {
        let mut links = vec![Link {
            title: Some("EPUB".to_string()),
            ..Link::new(
                format!("/books/{}/download", book.id),
                rel::ACQUISITION,
                EPUB_MIME,
            )
        }];
        if let Some(cover) = &book.cover_image {
            let href = format!("/books/{}/cover", book.id);
            links.push(Link::new(href.clone(), rel::IMAGE, image_mime(cover)));
            links.push(Link::new(href, rel::THUMBNAIL, image_mime(cover)));
        }
        Self {
            id: format!("urn:uuid:{}", book.uuid),
            title: book.title.clone(),
            updated: book.updated_at,
            authors: book.authors.iter().map(|a| a.name.clone()).collect(),
            language: book.language.as_ref().map(|l| l.code.clone()),
            issued: book.issued.clone(),
            publisher: book.publishers.first().map(|p| p.name.clone()),
            categories: book.tags.clone(),
            summary: book.summary.clone(),
            content: None,
            links,
        }
    }
}

/// An Atom feed in OPDS flavour.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: String,
    pub title: String,
    pub updated: DateTime<Utc>,
    pub kind: &'static str,
    pub links: Vec<Link>,
    pub entries: Vec<Entry>,
}

impl Feed {
    pub fn navigation(id: &str, title: &str, self_href: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            updated: Utc::now(),
            kind: mime::NAVIGATION,
            links: vec![
                Link::new(self_href, rel::SELF, mime::NAVIGATION),
                Link::new("/opds", rel::START, mime::NAVIGATION),
            ],
            entries: Vec::new(),
        }
    }

    /// A paged book feed; `updated` follows the newest entry.
    pub fn acquisition(id: &str, title: &str, base: &str, page: usize, pages: usize, books: &[Book]) -> Self {
        let mut feed = Self::navigation(id, title, &page_href(base, page));
        feed.kind = mime::ACQUISITION;
        feed.links[0].kind = mime::ACQUISITION.to_string();
        feed.links.push(Link::new("/opds", rel::UP, mime::NAVIGATION));
        if page > 1 {
            feed.links
                .push(Link::new(page_href(base, page - 1), rel::PREVIOUS, mime::ACQUISITION));
        }
        if page < pages {
            feed.links
                .push(Link::new(page_href(base, page + 1), rel::NEXT, mime::ACQUISITION));
        }
        if let Some(newest) = books.iter().map(|b| b.updated_at).max() {
            feed.updated = newest;
        }
        feed.entries = books.iter().map(Entry::from_book).collect();
        feed
    }

    pub fn to_xml(&self) -> std::io::Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
        feed.push_attribute(("xmlns:dc", "http://purl.org/dc/terms/"));
        feed.push_attribute(("xmlns:opds", "http://opds-spec.org/2010/catalog"));
        writer.write_event(Event::Start(feed))?;

        text_element(&mut writer, "id", &self.id)?;
        text_element(&mut writer, "title", &self.title)?;
        text_element(&mut writer, "updated", &self.updated.to_rfc3339())?;
        writer.write_event(Event::Start(BytesStart::new("author")))?;
        text_element(&mut writer, "name", "epub-catalog")?;
        writer.write_event(Event::End(BytesEnd::new("author")))?;
        for link in &self.links {
            write_link(&mut writer, link)?;
        }
        for entry in &self.entries {
            write_entry(&mut writer, entry)?;
        }
        writer.write_event(Event::End(BytesEnd::new("feed")))?;

        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn text_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, value: &str) -> std::io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_link<W: std::io::Write>(writer: &mut Writer<W>, link: &Link) -> std::io::Result<()> {
    let mut elem = BytesStart::new("link");
    elem.push_attribute(("rel", link.rel));
    elem.push_attribute(("href", link.href.as_str()));
    elem.push_attribute(("type", link.kind.as_str()));
    if let Some(title) = &link.title {
        elem.push_attribute(("title", title.as_str()));
    }
    writer.write_event(Event::Empty(elem))?;
    Ok(())
}

fn write_entry<W: std::io::Write>(writer: &mut Writer<W>, entry: &Entry) -> std::io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("entry")))?;
    text_element(writer, "id", &entry.id)?;
    text_element(writer, "title", &entry.title)?;
    text_element(writer, "updated", &entry.updated.to_rfc3339())?;
    for author in &entry.authors {
        writer.write_event(Event::Start(BytesStart::new("author")))?;
        text_element(writer, "name", author)?;
        writer.write_event(Event::End(BytesEnd::new("author")))?;
    }
    if let Some(language) = &entry.language {
        text_element(writer, "dc:language", language)?;
    }
    if let Some(issued) = &entry.issued {
        text_element(writer, "dc:issued", issued)?;
    }
    if let Some(publisher) = &entry.publisher {
        text_element(writer, "dc:publisher", publisher)?;
    }
    for term in &entry.categories {
        let mut elem = BytesStart::new("category");
        elem.push_attribute(("term", term.as_str()));
        elem.push_attribute(("label", term.as_str()));
        writer.write_event(Event::Empty(elem))?;
    }
    if let Some(summary) = &entry.summary {
        let mut elem = BytesStart::new("summary");
        elem.push_attribute(("type", "text"));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(summary)))?;
        writer.write_event(Event::End(BytesEnd::new("summary")))?;
    }
    if let Some(content) = &entry.content {
        let mut elem = BytesStart::new("content");
        elem.push_attribute(("type", "text"));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(content)))?;
        writer.write_event(Event::End(BytesEnd::new("content")))?;
    }
    for link in &entry.links {
        write_link(writer, link)?;
    }
    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

fn page_href(base: &str, page: usize) -> String {
    if page <= 1 {
        base.to_string()
    } else {
        format!("{base}?page={page}")
    }
}

fn tag_href(tag: &str) -> String {
    format!("/opds/tags/{}", utf8_percent_encode(tag, NON_ALPHANUMERIC))
}

fn atom(feed: &Feed) -> Result<Response, ApiError> {
    let xml = feed.to_xml().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, feed.kind)], xml).into_response())
}

async fn root(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.require_browse()?;
    let mut feed = Feed::navigation("urn:epub-catalog:root", "EPUB Catalog", "/opds");
    feed.entries.push(Entry::navigation(
        "urn:epub-catalog:books",
        "All books",
        "Every book in the catalog, newest first",
        "/opds/books",
        mime::ACQUISITION,
    ));
    feed.entries.push(Entry::navigation(
        "urn:epub-catalog:titles",
        "By title",
        "Every book in the catalog, by title",
        "/opds/titles",
        mime::ACQUISITION,
    ));
    feed.entries.push(Entry::navigation(
        "urn:epub-catalog:popular",
        "Most downloaded",
        "The most downloaded books first",
        "/opds/popular",
        mime::ACQUISITION,
    ));
    feed.entries.push(Entry::navigation(
        "urn:epub-catalog:authors",
        "By author",
        "Browse books by author",
        "/opds/authors",
        mime::NAVIGATION,
    ));
    feed.entries.push(Entry::navigation(
        "urn:epub-catalog:tags",
        "By tag",
        "Browse books by subject tag",
        "/opds/tags",
        mime::NAVIGATION,
    ));
    atom(&feed)
}

/// Shared body of the paged acquisition feeds. Paging and the published-only
/// filter are applied on top of `filter`.
fn book_feed(
    state: &AppState,
    id: &str,
    title: &str,
    base: &str,
    page: Option<usize>,
    filter: ListOptions,
) -> Result<Response, ApiError> {
    state.require_browse()?;
    let per_page = state.config.app.catalog.books_per_page;
    let (page, paging) = page_options(page, per_page);
    let opts = ListOptions {
        offset: paging.offset,
        limit: paging.limit,
        status: paging.status,
        ..filter
    };
    let result = state.lock()?.catalog().list(&opts)?;
    let pages = page_count(result.total, per_page);
    atom(&Feed::acquisition(id, title, base, page, pages, &result.entries))
}

async fn books(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    book_feed(
        &state,
        "urn:epub-catalog:books",
        "All books",
        "/opds/books",
        q.page,
        ListOptions::default(),
    )
}

async fn titles(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    let filter = ListOptions {
        order: BookOrder::Title,
        ..ListOptions::default()
    };
    book_feed(&state, "urn:epub-catalog:titles", "By title", "/opds/titles", q.page, filter)
}

async fn popular(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    let filter = ListOptions {
        order: BookOrder::Popular,
        ..ListOptions::default()
    };
    book_feed(
        &state,
        "urn:epub-catalog:popular",
        "Most downloaded",
        "/opds/popular",
        q.page,
        filter,
    )
}

async fn authors(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.require_browse()?;
    let authors = state.lock()?.catalog().authors()?;
    let mut feed = Feed::navigation("urn:epub-catalog:authors", "By author", "/opds/authors");
    feed.links.push(Link::new("/opds", rel::UP, mime::NAVIGATION));
    for author in &authors {
        feed.entries.push(Entry::navigation(
            &format!("urn:epub-catalog:author:{}", author.id),
            &author.name,
            &format!("Books by {}", author.name),
            &format!("/opds/authors/{}", author.id),
            mime::ACQUISITION,
        ));
    }
    atom(&feed)
}

async fn by_author(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    state.require_browse()?;
    let name = {
        let library = state.lock()?;
        let authors = library.catalog().authors()?;
        authors
            .into_iter()
            .find(|a| a.id == id)
            .map(|a| a.name)
            .ok_or(ApiError::NotFound(format!("author #{id}")))?
    };
    let filter = ListOptions {
        author: Some(id),
        order: BookOrder::Title,
        ..ListOptions::default()
    };
    book_feed(
        &state,
        &format!("urn:epub-catalog:author:{id}"),
        &format!("Books by {name}"),
        &format!("/opds/authors/{id}"),
        q.page,
        filter,
    )
}

async fn tags(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.require_browse()?;
    let tags = state.lock()?.catalog().tags()?;
    let mut feed = Feed::navigation("urn:epub-catalog:tags", "By tag", "/opds/tags");
    feed.links.push(Link::new("/opds", rel::UP, mime::NAVIGATION));
    for tag in &tags {
        let noun = if tag.count == 1 { "book" } else { "books" };
        feed.entries.push(Entry::navigation(
            &format!("urn:epub-catalog:tag:{}", tag.name),
            &tag.name,
            &format!("{} {}", tag.count, noun),
            &tag_href(&tag.name),
            mime::ACQUISITION,
        ));
    }
    atom(&feed)
}

async fn tagged(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    book_feed(
        &state,
        &format!("urn:epub-catalog:tag:{tag}"),
        &format!("Tagged \"{tag}\""),
        &tag_href(&tag),
        q.page,
        ListOptions {
            tag: Some(tag),
            ..ListOptions::default()
        },
    )
}
