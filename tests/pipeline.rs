use httpmock::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use cursor_docs::config::Config;
use cursor_docs::extract::ExtractedPage;
use cursor_docs::indexer::{AddOptions, AddOutcome, ContentReviewer, Review};
use cursor_docs::models::{MatchType, SearchMode, SourceStatus};
use cursor_docs::search::SearchOptions;
use cursor_docs::DocsService;

fn test_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.db.path = root.join("data").join("docs.sqlite");
    cfg.rate_limit.requests_per_second = 100;
    cfg.rate_limit.burst = 100;
    cfg.watcher.enabled = false;
    cfg.watcher.global_db = root.join("cursor").join("state.vscdb");
    cfg.watcher.workspace_storage = root.join("cursor").join("workspaceStorage");
    cfg
}

async fn open_service(customize: impl FnOnce(&mut Config)) -> (TempDir, DocsService) {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(tmp.path());
    customize(&mut cfg);
    let service = DocsService::open(cfg).await.unwrap();
    (tmp, service)
}

fn markdown_page() -> String {
    format!("# Title\n\n{}", "Paragraph text. ".repeat(200))
}

fn html_page(title: &str, body: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{}">{}</a> "#, l, l))
        .collect();
    format!(
        "<!DOCTYPE html><html><head><title>{}</title></head>\
         <body><nav>menu</nav><main><p>{}</p><p>{}</p></main></body></html>",
        title, body, anchors
    )
}

fn search_opts(limit: usize) -> SearchOptions {
    SearchOptions {
        limit: Some(limit),
        ..SearchOptions::default()
    }
}

#[tokio::test]
async fn test_markdown_page_is_indexed_in_chunks() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;

    let (_tmp, service) = open_service(|_| {}).await;
    let report = service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, AddOutcome::Indexed);
    assert_eq!(report.source.status, SourceStatus::Indexed);
    assert_eq!(report.source.pages_count, 1);
    assert!(report.source.chunks_count >= 2);
    assert!(report.source.last_indexed.is_some());
    assert!(report.follow.is_none());

    let results = service
        .search_text("paragraph", search_opts(100))
        .await
        .unwrap();
    assert_eq!(results.len() as i64, report.source.chunks_count);
    let first = results.iter().find(|r| r.position == 0).unwrap();
    assert_eq!(first.title, "Title");
    assert!(results.iter().all(|r| !r.content.trim().is_empty()));
}

#[tokio::test]
async fn test_add_same_content_twice_is_skipped() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;

    let (_tmp, service) = open_service(|_| {}).await;
    let url = server.url("/guide");
    let first = service.add(&url, AddOptions::default()).await.unwrap();
    let second = service.add(&url, AddOptions::default()).await.unwrap();

    assert_eq!(first.outcome, AddOutcome::Indexed);
    assert_eq!(second.outcome, AddOutcome::Skipped);
    assert_eq!(second.source.id, first.source.id);
    assert_eq!(second.source.chunks_count, first.source.chunks_count);
    assert_eq!(page.hits_async().await, 2);

    let sources = service.list().await.unwrap();
    assert_eq!(sources.len(), 1);
}

#[tokio::test]
async fn test_unmatched_query_returns_empty() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;

    let (_tmp, service) = open_service(|_| {}).await;
    service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .unwrap();

    let resp = service
        .search("kubernetes", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.resolved, SearchMode::Keyword);
    assert!(resp.results.is_empty());

    let text = service
        .search_text("kubernetes", SearchOptions::default())
        .await
        .unwrap();
    assert!(text.is_empty());
}

#[tokio::test]
async fn test_failed_fetch_marks_source_failed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/broken");
            then.status(500).body("boom");
        })
        .await;

    let (_tmp, service) = open_service(|_| {}).await;
    let err = service
        .add(&server.url("/broken"), AddOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "network_error");

    let sources = service.list().await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].status, SourceStatus::Failed);
    assert_eq!(sources[0].chunks_count, 0);
}

#[tokio::test]
async fn test_refresh_recovers_failed_source() {
    let server = MockServer::start_async().await;
    let mut broken = server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(503);
        })
        .await;

    let (_tmp, service) = open_service(|_| {}).await;
    assert!(service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .is_err());
    let id = service.list().await.unwrap()[0].id.clone();

    broken.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;

    let report = service.refresh(&id).await.unwrap();
    assert_eq!(report.outcome, AddOutcome::Indexed);
    assert_eq!(report.source.status, SourceStatus::Indexed);
    assert!(report.source.chunks_count >= 2);
}

#[tokio::test]
async fn test_remove_deletes_chunks() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;

    let (_tmp, service) = open_service(|_| {}).await;
    let report = service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .unwrap();

    service.remove(&report.source.id).await.unwrap();

    assert!(service.list().await.unwrap().is_empty());
    assert!(service
        .search_text("paragraph", SearchOptions::default())
        .await
        .unwrap()
        .is_empty());
    let status = service.storage_status().await.unwrap();
    assert_eq!(status.sources, 0);
    assert_eq!(status.chunks, 0);

    let err = service.remove(&report.source.id).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_follow_links_respects_max_pages() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200)
                .header("content-type", "text/html")
                .body(html_page(
                    "Home",
                    "Welcome to the handbook.",
                    &["/p1", "/p2", "/p3", "/p4", "https://elsewhere.example/x"],
                ));
        })
        .await;
    let mut pages = Vec::new();
    for n in 1..=4 {
        let path = format!("/p{}", n);
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path(path.clone());
                then.status(200).header("content-type", "text/html").body(html_page(
                    &format!("Page {}", n),
                    &format!("Chapter {} covers the widget lifecycle.", n),
                    &["/", "/p4"],
                ));
            })
            .await;
        pages.push(mock);
    }

    let (_tmp, service) = open_service(|_| {}).await;
    let opts = AddOptions {
        max_pages: Some(3),
        follow_links: Some(true),
        ..AddOptions::default()
    };
    let report = service.add(&server.url("/"), opts).await.unwrap();
    assert_eq!(report.outcome, AddOutcome::Indexed);

    let follow = report.follow.expect("link-following should start");
    let followed = follow.await.unwrap();
    assert_eq!(followed.pages_indexed, 2);
    assert_eq!(followed.pages_failed, 0);

    assert_eq!(pages[0].hits_async().await, 1);
    assert_eq!(pages[1].hits_async().await, 1);
    assert_eq!(pages[2].hits_async().await, 0);
    assert_eq!(pages[3].hits_async().await, 0);

    let source = &service.list().await.unwrap()[0];
    assert_eq!(source.pages_count, 3);
    assert_eq!(source.status, SourceStatus::Indexed);

    let hits = service
        .search_text("widget lifecycle", search_opts(10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| !h.content.contains("menu")));
}

#[tokio::test]
async fn test_refresh_cancels_running_link_following() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docs");
            then.status(200)
                .header("content-type", "text/html")
                .body(html_page("Docs", "Start here.", &["/docs/a", "/docs/b"]));
        })
        .await;
    for name in ["a", "b"] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/docs/{}", name));
                then.status(200)
                    .delay(Duration::from_millis(300))
                    .header("content-type", "text/html")
                    .body(html_page(name, "Each gadget has a serial number.", &[]));
            })
            .await;
    }

    let (_tmp, service) = open_service(|_| {}).await;
    let opts = AddOptions {
        max_pages: Some(3),
        follow_links: Some(true),
        ..AddOptions::default()
    };
    let report = service.add(&server.url("/docs"), opts).await.unwrap();
    let stale = report.follow.expect("link-following should start");

    let refreshed = service.refresh(&report.source.id).await.unwrap();
    assert!(stale.await.unwrap_err().is_cancelled());

    let followed = refreshed.follow.expect("link-following should restart");
    assert_eq!(followed.await.unwrap().pages_indexed, 2);

    let source = &service.list().await.unwrap()[0];
    assert_eq!(source.status, SourceStatus::Indexed);
    assert_eq!(source.pages_count, 3);
    let hits = service.search_text("gadget", search_opts(10)).await.unwrap();
    assert_eq!(hits.len(), 2);
}

/// Panics on its first review, accepts everything afterwards.
struct PanicOnce(AtomicBool);

impl ContentReviewer for PanicOnce {
    fn review(&self, url: &str, _page: &ExtractedPage) -> Review {
        if self.0.swap(false, Ordering::SeqCst) {
            panic!("reviewer crashed on {}", url);
        }
        Review::Accept
    }
}

async fn guide_server() -> MockServer {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;
    server
}

async fn open_panicking_service() -> (TempDir, DocsService) {
    let tmp = TempDir::new().unwrap();
    let reviewer = Arc::new(PanicOnce(AtomicBool::new(true)));
    let service = DocsService::open_with_reviewer(test_config(tmp.path()), reviewer)
        .await
        .unwrap();
    (tmp, service)
}

#[tokio::test]
async fn test_crashed_scrape_is_recovered_on_start() {
    let server = guide_server().await;
    let (_tmp, service) = open_panicking_service().await;

    let err = service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "internal");

    let stuck = service.list().await.unwrap().remove(0);
    assert_eq!(stuck.status, SourceStatus::Indexing);

    service.start_background().await.unwrap();
    let recovered = service.list().await.unwrap().remove(0);
    assert_eq!(recovered.status, SourceStatus::Failed);

    let report = service.refresh(&stuck.id).await.unwrap();
    assert_eq!(report.outcome, AddOutcome::Indexed);
    assert_eq!(report.source.status, SourceStatus::Indexed);
}

#[tokio::test]
async fn test_add_reenters_source_abandoned_mid_index() {
    let server = guide_server().await;
    let (_tmp, service) = open_panicking_service().await;

    assert!(service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .is_err());

    let report = service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, AddOutcome::Indexed);
    assert_eq!(report.source.status, SourceStatus::Indexed);
    assert!(report.source.chunks_count >= 2);
}

#[tokio::test]
async fn test_semantic_mode_without_backend() {
    let (_tmp, service) = open_service(|_| {}).await;

    let err = service
        .search_semantic("anything", SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "semantic_unavailable");

    let resp = service
        .search(
            "anything",
            SearchOptions {
                mode: SearchMode::Hybrid,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(resp.resolved, SearchMode::Keyword);
    assert!(resp.warning.is_some());

    let status = service.storage_status().await.unwrap();
    assert_eq!(status.primary_backend, "sqlite");
    assert!(status.vector_backend.is_none());
    assert!(!status.semantic_ready);
}

#[tokio::test]
async fn test_hybrid_search_with_local_vectors_and_ollama() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200).body("Ollama is running");
        })
        .await;
    let embeddings = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embeddings")
                .json_body_partial(r#"{"model": "nomic-embed-text"}"#);
            then.status(200)
                .json_body(serde_json::json!({ "embedding": [0.1, 0.2, 0.3] }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;

    let base = server.base_url();
    let (_tmp, service) = open_service(|cfg| {
        cfg.embedding.provider = "ollama".to_string();
        cfg.embedding.urls = vec![base];
        cfg.vector.backend = "local".to_string();
    })
    .await;

    let report = service
        .add(&server.url("/guide"), AddOptions::default())
        .await
        .unwrap();
    let chunks = report.source.chunks_count;
    assert!(embeddings.hits_async().await >= chunks as usize);

    let status = service.storage_status().await.unwrap();
    assert!(status.semantic_ready);
    assert_eq!(status.vector_backend.as_deref(), Some("local"));
    assert_eq!(status.vectors, Some(chunks));

    let resp = service
        .search("paragraph", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.resolved, SearchMode::Hybrid);
    assert!(resp.warning.is_none());
    assert!(!resp.results.is_empty());
    assert_eq!(resp.results[0].match_type, MatchType::Hybrid);
    assert!(resp.results[0].score <= 1.0 + 1e-9);

    let semantic = service
        .search_semantic("paragraph", SearchOptions::default())
        .await
        .unwrap();
    assert!(!semantic.is_empty());
    assert!(semantic.iter().all(|r| r.match_type == MatchType::Semantic));
}

#[tokio::test]
async fn test_sync_from_cursor_state_database() {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/guide");
            then.status(200)
                .header("content-type", "text/markdown")
                .body(markdown_page());
        })
        .await;

    let (tmp, service) = open_service(|_| {}).await;

    let db_path = test_config(tmp.path()).watcher.global_db;
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB)")
        .execute(&pool)
        .await
        .unwrap();
    let value = format!(
        r#"[{{"url": "{}", "name": "Guide"}}, "{}"]"#,
        server.url("/guide"),
        server.url("/guide")
    );
    sqlx::query("INSERT INTO ItemTable (key, value) VALUES ('cursor.selectedDocs', ?)")
        .bind(value.as_bytes())
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let docs = service.list_cursor_docs().await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].name, "Guide");

    let first = service.sync_from_cursor().await;
    assert_eq!(first.discovered, 1);
    assert_eq!(first.added, 1);
    assert_eq!(first.failed, 0);

    let second = service.sync_from_cursor().await;
    assert_eq!(second.skipped, 1);

    let sources = service.list().await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "Guide");
}
