use std::time::Duration;

use httpmock::{Method::GET, Mock, MockServer};
use site_ingest::config::CrawlSettings;
use site_ingest::crawler::{CrawlError, CrawlOutcome, Crawler};
use site_ingest::data_models::PageRecord;
use tokio_util::sync::CancellationToken;

mod test_helpers {
    use super::*;

    pub fn settings(max_depth: usize, concurrency: usize) -> CrawlSettings {
        CrawlSettings {
            max_depth,
            concurrency,
            deadline: None,
            fetch_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
            ..CrawlSettings::default()
        }
    }

    /// A page whose body carries a marker naming its path and links to `hrefs`.
    pub fn page_html(path: &str, hrefs: &[&str]) -> String {
        let anchors: String = hrefs
            .iter()
            .map(|href| format!(r#"<a href="{href}">to {href}</a>"#))
            .collect();
        format!(
            "<html><head><title>page {path}</title></head><body><p>marker:{path}</p>{anchors}</body></html>"
        )
    }

    pub async fn serve_page<'a>(server: &'a MockServer, path: &str, hrefs: &[&str]) -> Mock<'a> {
        let body = page_html(path, hrefs);
        let path = path.to_string();
        server
            .mock_async(move |when, then| {
                when.method(GET).path(path);
                then.status(200)
                    .header("content-type", "text/html; charset=utf-8")
                    .body(body);
            })
            .await
    }

    pub async fn crawl(
        server: &MockServer,
        settings: &CrawlSettings,
    ) -> Result<CrawlOutcome, CrawlError> {
        let crawler = Crawler::from_settings(settings).unwrap();
        crawler
            .crawl(&server.url("/"), &CancellationToken::new())
            .await
    }

    pub fn child_urls(page: &PageRecord) -> Vec<&str> {
        page.child_pages.iter().map(|c| c.url.as_str()).collect()
    }
}

use test_helpers::*;

#[tokio::test]
async fn root_without_links_has_no_child_pages() {
    let server = MockServer::start_async().await;
    let root = serve_page(&server, "/", &[]).await;

    let outcome = crawl(&server, &settings(2, 4)).await.unwrap();

    assert!(outcome.root.links.is_empty());
    assert!(outcome.root.child_pages.is_empty());
    assert!(outcome.stats.complete);
    assert_eq!(outcome.root.title.as_deref(), Some("page /"));
    assert!(outcome.root.text.contains("marker:/"));

    let json = serde_json::to_value(&outcome.root).unwrap();
    assert_eq!(json["links"], serde_json::json!([]));
    assert!(json.get("child_pages").is_none());
    root.assert_hits_async(1).await;
}

#[tokio::test]
async fn chain_stops_expanding_at_max_depth() {
    let server = MockServer::start_async().await;
    serve_page(&server, "/", &["/a"]).await;
    serve_page(&server, "/a", &["/b"]).await;
    serve_page(&server, "/b", &["/c"]).await;
    let c = serve_page(&server, "/c", &[]).await;

    let outcome = crawl(&server, &settings(2, 4)).await.unwrap();
    let root = &outcome.root;

    assert_eq!(child_urls(root), vec![server.url("/a")]);
    let a = &root.child_pages[0];
    assert_eq!(child_urls(a), vec![server.url("/b")]);
    let b = &a.child_pages[0];
    assert_eq!(b.links.len(), 1);
    assert_eq!(b.links[0].url, server.url("/c"));
    assert!(b.child_pages.is_empty());
    assert_eq!(root.tree_depth(), 2);

    c.assert_hits_async(0).await;
}

#[tokio::test]
async fn duplicate_links_are_listed_twice_but_expanded_once() {
    let server = MockServer::start_async().await;
    serve_page(&server, "/", &["/a", "/a"]).await;
    let a = serve_page(&server, "/a", &[]).await;

    let outcome = crawl(&server, &settings(2, 4)).await.unwrap();

    assert_eq!(outcome.root.links.len(), 2);
    assert_eq!(child_urls(&outcome.root), vec![server.url("/a")]);
    a.assert_hits_async(1).await;
}

#[tokio::test]
async fn failed_child_is_listed_but_siblings_continue() {
    let server = MockServer::start_async().await;
    serve_page(&server, "/", &["/missing", "/ok"]).await;
    let missing = server
        .mock_async(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        })
        .await;
    serve_page(&server, "/ok", &[]).await;

    let outcome = crawl(&server, &settings(2, 4)).await.unwrap();

    let links: Vec<&str> = outcome.root.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(links, vec![server.url("/missing"), server.url("/ok")]);
    assert_eq!(child_urls(&outcome.root), vec![server.url("/ok")]);
    assert_eq!(outcome.stats.pages_failed, 1);
    assert_eq!(outcome.stats.pages_scraped, 2);
    missing.assert_hits_async(1).await;
}

#[tokio::test]
async fn cycles_fetch_each_url_once_and_build_a_tree() {
    let server = MockServer::start_async().await;
    let root = serve_page(&server, "/", &["/a", "/b"]).await;
    let a = serve_page(&server, "/a", &["/b", "/"]).await;
    let b = serve_page(&server, "/b", &["/a", "/"]).await;

    let outcome = crawl(&server, &settings(3, 4)).await.unwrap();

    // depth-first: /a claims /b before the root's own link to /b is reached
    let tree = &outcome.root;
    assert_eq!(child_urls(tree), vec![server.url("/a")]);
    assert_eq!(child_urls(&tree.child_pages[0]), vec![server.url("/b")]);
    assert!(tree.child_pages[0].child_pages[0].child_pages.is_empty());
    assert_eq!(tree.links.len(), 2);
    assert_eq!(tree.page_count(), 3);

    root.assert_hits_async(1).await;
    a.assert_hits_async(1).await;
    b.assert_hits_async(1).await;
}

#[tokio::test]
async fn off_origin_links_are_neither_listed_nor_fetched() {
    let server = MockServer::start_async().await;
    let https_twin = server.url("/x").replacen("http://", "https://", 1);
    let other = "http://other.example/x".to_string();
    serve_page(&server, "/", &[other.as_str(), https_twin.as_str(), "/x"]).await;
    let x = serve_page(&server, "/x", &[]).await;

    let outcome = crawl(&server, &settings(2, 4)).await.unwrap();

    let links: Vec<&str> = outcome.root.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(links, vec![server.url("/x")]);
    x.assert_hits_async(1).await;
}

#[tokio::test]
async fn tree_is_identical_for_any_concurrency() {
    let server = MockServer::start_async().await;
    serve_page(&server, "/", &["/a", "/b", "/c", "/a"]).await;
    serve_page(&server, "/a", &["/c", "/d", "/"]).await;
    serve_page(&server, "/b", &["/d", "/e"]).await;
    serve_page(&server, "/c", &["/e", "/f"]).await;
    serve_page(&server, "/d", &["/f", "/g"]).await;
    serve_page(&server, "/e", &["/g"]).await;
    serve_page(&server, "/f", &["/a"]).await;
    serve_page(&server, "/g", &[]).await;

    let sequential = crawl(&server, &settings(2, 1)).await.unwrap();
    let concurrent = crawl(&server, &settings(2, 16)).await.unwrap();

    assert_eq!(sequential.root, concurrent.root);
    assert!(sequential.root.tree_depth() <= 2);
    // /a claims /c and /d first, so /c hangs under /a rather than the root
    assert_eq!(
        child_urls(&sequential.root),
        vec![server.url("/a"), server.url("/b")]
    );
    assert_eq!(
        child_urls(&sequential.root.child_pages[0]),
        vec![server.url("/c"), server.url("/d")]
    );
}

#[tokio::test]
async fn no_page_is_deeper_than_max_depth() {
    let server = MockServer::start_async().await;
    serve_page(&server, "/", &["/1"]).await;
    serve_page(&server, "/1", &["/2"]).await;
    let two = serve_page(&server, "/2", &["/3"]).await;

    for max_depth in 0..=1 {
        let outcome = crawl(&server, &settings(max_depth, 4)).await.unwrap();
        assert_eq!(outcome.root.tree_depth(), max_depth);
    }
    two.assert_hits_async(0).await;
}

#[tokio::test]
async fn unreachable_root_fails_the_crawl() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(500);
        })
        .await;

    let err = crawl(&server, &settings(2, 4)).await.unwrap_err();
    assert!(matches!(err, CrawlError::RootUnreachable { .. }), "{err}");
}

#[tokio::test]
async fn cancelled_before_root_is_an_error() {
    let server = MockServer::start_async().await;
    serve_page(&server, "/", &[]).await;

    let crawler = Crawler::from_settings(&settings(2, 4)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = crawler.crawl(&server.url("/"), &cancel).await.unwrap_err();
    assert!(matches!(err, CrawlError::Cancelled));
}

#[tokio::test]
async fn deadline_returns_partial_tree() {
    let server = MockServer::start_async().await;
    serve_page(&server, "/", &["/fast", "/slow"]).await;
    serve_page(&server, "/fast", &[]).await;
    let slow_body = page_html("/slow", &[]);
    server
        .mock_async(move |when, then| {
            when.method(GET).path("/slow");
            then.status(200)
                .delay(Duration::from_secs(3))
                .body(slow_body);
        })
        .await;

    let mut settings = settings(2, 4);
    settings.deadline = Some(Duration::from_millis(500));
    let outcome = crawl(&server, &settings).await.unwrap();

    assert!(!outcome.stats.complete);
    assert_eq!(child_urls(&outcome.root), vec![server.url("/fast")]);
    assert_eq!(outcome.root.links.len(), 2);
}

#[tokio::test]
async fn invalid_root_is_rejected_without_fetching() {
    let crawler = Crawler::from_settings(&settings(2, 4)).unwrap();
    let err = crawler
        .crawl("not a url", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::InvalidRoot { .. }));
}
