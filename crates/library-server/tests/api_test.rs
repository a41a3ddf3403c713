//! Integration tests for the catalog server routes.

use axum::Router;
use bytes::Bytes;
use epub_catalog_core::config::AppConfig;
use epub_catalog_core::fixtures::{EpubBuilder, FAKE_JPEG};
use epub_catalog_server::{api_routes, config::ServerConfig, AppState};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use tempfile::TempDir;
use tower::ServiceExt;

async fn body_to_bytes<B>(body: B) -> Bytes
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Debug + std::fmt::Display,
{
    body.collect().await.unwrap().to_bytes()
}

struct Server {
    media: TempDir,
    app: Router,
}

impl Server {
    async fn new(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::on(tempfile::tempdir().unwrap(), tweak).await
    }

    /// A server over an existing media root, e.g. one filled by another server.
    async fn on(media: TempDir, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut app = AppConfig::default();
        app.library.media_root = media.path().to_path_buf();
        tweak(&mut app);
        let config = ServerConfig {
            app,
            bind: "127.0.0.1:0".to_string(),
        };
        let state = AppState::new(config).await.unwrap();
        Self {
            media,
            app: api_routes(state),
        }
    }

    async fn open() -> Self {
        Self::new(|c| {
            c.catalog.allow_public_upload = true;
            c.catalog.allow_public_edit = true;
        })
        .await
    }

    fn into_media(self) -> TempDir {
        self.media
    }

    async fn send(&self, method: &str, uri: &str, body: Vec<u8>) -> (StatusCode, Response<axum::body::Body>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body)))
            .unwrap();
        let response = self.app.clone().oneshot(req).await.unwrap();
        (response.status(), response)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Bytes) {
        let (status, response) = self.send("GET", uri, Vec::new()).await;
        (status, body_to_bytes(response.into_body()).await)
    }

    async fn json(&self, uri: &str) -> serde_json::Value {
        let (status, body) = self.get(uri).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    async fn upload(&self, name: &str, data: Vec<u8>) -> (StatusCode, Bytes) {
        let (status, response) = self
            .send("POST", &format!("/api/books?filename={name}"), data)
            .await;
        (status, body_to_bytes(response.into_body()).await)
    }
}

fn epub(title: &str) -> Vec<u8> {
    EpubBuilder::new(title).build().unwrap()
}

#[tokio::test]
async fn empty_catalog_lists_nothing() {
    let server = Server::new(|_| {}).await;
    let json = server.json("/api/books").await;
    assert_eq!(json["books"].as_array().unwrap().len(), 0);
    assert_eq!(json["total"], 0);
    assert_eq!(json["page"], 1);
    assert_eq!(json["pages"], 1);
}

#[tokio::test]
async fn upload_is_forbidden_by_default() {
    let server = Server::new(|_| {}).await;
    let (status, _) = server.upload("a.epub", epub("Nope")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(server.json("/api/books").await["total"], 0);
}

#[tokio::test]
async fn upload_creates_then_conflicts() {
    let server = Server::open().await;
    let data = epub("Uploaded");

    let (status, body) = server.upload("uploaded.epub", data.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let book: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(book["title"], "Uploaded");
    assert_eq!(book["book_file"], "books/uploaded.epub");
    assert_eq!(book["original_path"], "uploaded.epub");

    let (status, body) = server.upload("again.epub", data).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(&body[..], b"The file is already on the database");
    assert_eq!(server.json("/api/books").await["total"], 1);
}

#[tokio::test]
async fn invalid_upload_is_unprocessable() {
    let server = Server::open().await;
    let (status, body) = server.upload("junk.epub", b"not a zip".to_vec()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!body.is_empty());

    let (status, _) = server.upload("empty.epub", Vec::new()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(server.json("/api/books").await["total"], 0);
}

#[tokio::test]
async fn download_counts_and_serves_the_file() {
    let server = Server::open().await;
    let data = epub("Fetched");
    server.upload("fetched.epub", data.clone()).await;

    let (status, response) = server.send("GET", "/books/1/download", Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        response.headers()[http::header::CONTENT_TYPE],
        "application/epub+zip"
    );
    assert!(response.headers()[http::header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("fetched%2Eepub"));
    assert_eq!(body_to_bytes(response.into_body()).await, data);

    assert_eq!(server.json("/api/books/1").await["downloads"], 1);
    let (status, _) = server.get("/books/9/download").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cover_is_served_when_present() {
    let server = Server::open().await;
    let with_cover = EpubBuilder::new("Covered")
        .cover_image("images/cover.jpg", FAKE_JPEG)
        .build()
        .unwrap();
    server.upload("covered.epub", with_cover).await;
    server.upload("plain.epub", epub("Plain")).await;

    let (status, response) = server.send("GET", "/books/1/cover", Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.headers()[http::header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(&body_to_bytes(response.into_body()).await[..], FAKE_JPEG);

    let (status, _) = server.get("/books/2/cover").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_needs_edit_permission() {
    let locked = Server::new(|c| c.catalog.allow_public_upload = true).await;
    locked.upload("keep.epub", epub("Keep")).await;
    let (status, _) = locked.send("DELETE", "/api/books/1", Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let server = Server::open().await;
    server.upload("gone.epub", epub("Gone")).await;
    let (status, _) = server.send("DELETE", "/api/books/1", Vec::new()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = server.get("/api/books/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server.send("DELETE", "/api/books/1", Vec::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_by_query_and_tag() {
    let server = Server::open().await;
    let tagged = EpubBuilder::new("Dune").subject("Science Fiction").build().unwrap();
    server.upload("dune.epub", tagged).await;
    server.upload("emma.epub", epub("Emma")).await;

    let all = server.json("/api/books").await;
    assert_eq!(all["books"][0]["title"], "Emma");
    assert_eq!(server.json("/api/books?q=dun").await["total"], 1);
    let by_tag = server.json("/api/books?tag=science%20fiction").await;
    assert_eq!(by_tag["books"][0]["title"], "Dune");
}

#[tokio::test]
async fn browsing_can_be_disabled() {
    let server = Server::new(|c| c.catalog.allow_public_browse = false).await;
    let uris = [
        "/api/books",
        "/api/books/1",
        "/api/authors",
        "/opds",
        "/opds/books",
        "/opds/popular",
        "/opds/tags",
        "/opds/authors",
        "/opds/authors/1",
    ];
    for uri in uris {
        let (status, _) = server.get(uri).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }
}

#[tokio::test]
async fn opds_feeds_page_newest_first() {
    let server = Server::new(|c| {
        c.catalog.allow_public_upload = true;
        c.catalog.books_per_page = 1;
    })
    .await;
    server.upload("old.epub", epub("Older")).await;
    server.upload("new.epub", epub("Newer")).await;

    let (status, response) = server.send("GET", "/opds/books", Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.headers()[http::header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .contains("kind=acquisition"));
    let first = String::from_utf8(body_to_bytes(response.into_body()).await.to_vec()).unwrap();
    assert!(first.contains("<title>Newer</title>"), "{first}");
    assert!(!first.contains("<title>Older</title>"));
    assert!(first.contains(r#"rel="next" href="/opds/books?page=2""#), "{first}");
    assert!(first.contains(r#"href="/books/2/download""#));

    let (_, second) = server.get("/opds/books?page=2").await;
    let second = String::from_utf8(second.to_vec()).unwrap();
    assert!(second.contains("<title>Older</title>"));
    assert!(second.contains(r#"rel="previous" href="/opds/books""#), "{second}");
    assert!(!second.contains(r#"rel="next""#));
}

#[tokio::test]
async fn opds_tags_navigate_to_tagged_books() {
    let server = Server::open().await;
    let tagged = EpubBuilder::new("Dune").subject("Science Fiction").build().unwrap();
    server.upload("dune.epub", tagged).await;
    server.upload("emma.epub", epub("Emma")).await;

    let (status, root) = server.get("/opds").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&root).contains(r#"href="/opds/tags""#));

    let (_, tags) = server.get("/opds/tags").await;
    let tags = String::from_utf8(tags.to_vec()).unwrap();
    assert!(tags.contains("<title>science fiction</title>"), "{tags}");
    assert!(tags.contains("/opds/tags/science%20fiction"));
    assert!(tags.contains("1 book"));

    let (status, feed) = server.get("/opds/tags/science%20fiction").await;
    assert_eq!(status, StatusCode::OK);
    let feed = String::from_utf8(feed.to_vec()).unwrap();
    assert!(feed.contains("<title>Dune</title>"));
    assert!(!feed.contains("<title>Emma</title>"));
}

fn titles(page: &serde_json::Value) -> Vec<String> {
    page["books"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["title"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn list_sorts_and_filters_by_author() {
    let server = Server::open().await;
    let beta = EpubBuilder::new("Beta")
        .creator("Zed Poet")
        .publisher("Penguin")
        .build()
        .unwrap();
    let alpha = EpubBuilder::new("alpha").creator("Amy Writer").build().unwrap();
    server.upload("beta.epub", beta).await;
    server.upload("alpha.epub", alpha).await;
    server.get("/books/1/download").await;

    assert_eq!(titles(&server.json("/api/books").await), vec!["alpha", "Beta"]);
    assert_eq!(titles(&server.json("/api/books?sort=title").await), vec!["alpha", "Beta"]);
    assert_eq!(titles(&server.json("/api/books?sort=popular").await), vec!["Beta", "alpha"]);
    assert_eq!(titles(&server.json("/api/books?sort=author").await), vec!["alpha", "Beta"]);
    let (status, _) = server.get("/api/books?sort=sideways").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let authors = server.json("/api/authors").await;
    assert_eq!(authors[0]["name"], "Amy Writer");
    let zed = authors[1]["id"].as_i64().unwrap();
    let by_zed = server.json(&format!("/api/books?author={zed}")).await;
    assert_eq!(titles(&by_zed), vec!["Beta"]);
    let publishers = server.json("/api/publishers").await;
    assert_eq!(publishers.as_array().unwrap().len(), 1);
    assert_eq!(publishers[0]["name"], "Penguin");
}

#[tokio::test]
async fn unpublished_books_are_not_listed() {
    let drafts = Server::new(|c| {
        c.catalog.allow_public_upload = true;
        c.import.default_status = "Draft".to_string();
    })
    .await;
    drafts.upload("draft.epub", epub("Hidden")).await;
    let media = drafts.into_media();

    let server = Server::on(media, |c| c.catalog.allow_public_upload = true).await;
    server.upload("public.epub", epub("Shown")).await;

    let page = server.json("/api/books").await;
    assert_eq!(page["total"], 1);
    assert_eq!(titles(&page), vec!["Shown"]);
    let (_, feed) = server.get("/opds/books").await;
    let feed = String::from_utf8(feed.to_vec()).unwrap();
    assert!(feed.contains("<title>Shown</title>"));
    assert!(!feed.contains("<title>Hidden</title>"));
    // Still reachable by id.
    assert_eq!(server.json("/api/books/1").await["status"], "Draft");
}

#[tokio::test]
async fn page_past_the_end_is_empty() {
    let server = Server::open().await;
    server.upload("one.epub", epub("One")).await;
    let page = server.json(&format!("/api/books?page={}", usize::MAX)).await;
    assert_eq!(page["books"].as_array().unwrap().len(), 0);
    assert_eq!(page["total"], 1);
    let (status, _) = server.get(&format!("/opds/books?page={}", usize::MAX)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn opds_browse_by_title_popularity_and_author() {
    let server = Server::open().await;
    let beta = EpubBuilder::new("Beta").creator("Zed Poet").build().unwrap();
    let alpha = EpubBuilder::new("alpha").creator("Amy Writer").build().unwrap();
    server.upload("beta.epub", beta).await;
    server.upload("alpha.epub", alpha).await;
    server.get("/books/1/download").await;

    let (_, root) = server.get("/opds").await;
    let root = String::from_utf8(root.to_vec()).unwrap();
    for href in ["/opds/titles", "/opds/popular", "/opds/authors"] {
        assert!(root.contains(&format!(r#"href="{href}""#)), "{href}");
    }

    let order = |xml: &str| xml.find("<title>alpha</title>").unwrap() < xml.find("<title>Beta</title>").unwrap();
    let (_, by_title) = server.get("/opds/titles").await;
    assert!(order(&String::from_utf8(by_title.to_vec()).unwrap()));
    let (_, popular) = server.get("/opds/popular").await;
    assert!(!order(&String::from_utf8(popular.to_vec()).unwrap()));

    let (_, authors) = server.get("/opds/authors").await;
    let authors = String::from_utf8(authors.to_vec()).unwrap();
    assert!(authors.contains("<title>Amy Writer</title>"), "{authors}");
    let zed = server.json("/api/authors").await[1]["id"].as_i64().unwrap();
    assert!(authors.contains(&format!(r#"href="/opds/authors/{zed}""#)));

    let (status, feed) = server.get(&format!("/opds/authors/{zed}")).await;
    assert_eq!(status, StatusCode::OK);
    let feed = String::from_utf8(feed.to_vec()).unwrap();
    assert!(feed.contains("<title>Books by Zed Poet</title>"));
    assert!(feed.contains("<title>Beta</title>"));
    assert!(!feed.contains("<title>alpha</title>"));
    let (status, _) = server.get("/opds/authors/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
