//! End-to-end crawl against a local HTTP stub (plain-HTTP mode).

use axe_audit::config::CrawlerConfig;
use axe_audit::crawler::{CrawlState, SiteCrawler};
use tokio::sync::watch;

fn page(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!("<a href=\"{href}\">{href}</a>"))
        .collect();
    format!(
        "<html><body>\
         <header><div>logo</div></header>\
         <nav>{anchors}</nav>\
         <main><h1>{title}</h1><p>{}</p></main>\
         <footer><p>footer</p></footer>\
         </body></html>",
        "filler content ".repeat(400)
    )
}

fn test_config() -> CrawlerConfig {
    CrawlerConfig {
        max_urls_per_domain: 5,
        max_total_urls: 10,
        depth_limit: 3,
        request_delay_ms: 0,
        hybrid_mode: false,
        retry_times: 1,
        retry_delay_ms: 10,
        retry_delay_max_ms: 50,
        auto_save_interval: 2,
        resume: false,
        ..CrawlerConfig::default()
    }
}

#[tokio::test]
async fn single_page_domain_discovers_both_pages() {
    let mut server = mockito::Server::new_async().await;
    let _home = server
        .mock("GET", "/")
        .with_header("content-type", "text/html")
        .with_body(page("Home", &["/", "/about"]))
        .create_async()
        .await;
    let _about = server
        .mock("GET", "/about")
        .with_header("content-type", "text/html")
        .with_body(page("About", &["/"]))
        .create_async()
        .await;

    let root = tempfile::tempdir().unwrap();
    let crawler = SiteCrawler::new(
        vec![server.url()],
        test_config(),
        false,
        root.path(),
    )
    .unwrap();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let outcome = crawler.run(cancel_rx).await.unwrap();

    assert!(!outcome.cancelled);
    assert_eq!(outcome.state.total_visited(), 2, "home and /about");
    let domain = outcome.state.domain("127.0.0.1").expect("domain state");
    assert!(domain
        .visited
        .iter()
        .any(|u| u.as_str().ends_with("/about")));

    // Both pages share the structural skeleton here, so the clusters are
    // either one (identical signature) or two; every cluster must be
    // internally consistent with a member representative.
    assert!(!domain.templates.is_empty());
    for cluster in domain.templates.values() {
        assert!(cluster.is_consistent());
    }

    // State landed on disk under the contract path.
    let state_path = root
        .path()
        .join("127_0_0_1")
        .join("crawler_output")
        .join("crawler_state_127_0_0_1.json");
    assert!(state_path.exists());
    let reloaded = CrawlState::load(&state_path).unwrap();
    assert_eq!(reloaded.total_visited(), 2);
}

#[tokio::test]
async fn zero_budget_is_a_noop_with_empty_state_file() {
    let root = tempfile::tempdir().unwrap();
    let config = CrawlerConfig {
        max_urls_per_domain: 0,
        ..test_config()
    };
    let crawler = SiteCrawler::new(vec!["e.test".to_string()], config, false, root.path()).unwrap();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let outcome = crawler.run(cancel_rx).await.unwrap();
    assert_eq!(outcome.state.total_visited(), 0);

    let state_path = root
        .path()
        .join("e_test")
        .join("crawler_output")
        .join("crawler_state_e_test.json");
    assert!(state_path.exists(), "empty state file still written");
    let reloaded = CrawlState::load(&state_path).unwrap();
    assert_eq!(reloaded.total_visited(), 0);
}

#[tokio::test]
async fn resume_does_not_refetch_visited_urls() {
    let mut server = mockito::Server::new_async().await;
    let home = server
        .mock("GET", "/")
        .with_header("content-type", "text/html")
        .with_body(page("Home", &["/about"]))
        .expect(1)
        .create_async()
        .await;
    let about = server
        .mock("GET", "/about")
        .with_header("content-type", "text/html")
        .with_body(page("About", &["/"]))
        .expect(1)
        .create_async()
        .await;

    let root = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.resume = true;

    let crawler =
        SiteCrawler::new(vec![server.url()], config.clone(), false, root.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let first = crawler.run(rx).await.unwrap();
    let visited_before = first.state.total_visited();
    assert_eq!(visited_before, 2);

    // Second run resumes from the persisted state: nothing is re-fetched,
    // and the visited count is unchanged.
    let crawler = SiteCrawler::new(vec![server.url()], config, false, root.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let second = crawler.run(rx).await.unwrap();
    assert_eq!(second.state.total_visited(), visited_before);

    home.assert_async().await;
    about.assert_async().await;
}

#[tokio::test]
async fn per_url_failures_do_not_abort_the_crawl() {
    let mut server = mockito::Server::new_async().await;
    let _home = server
        .mock("GET", "/")
        .with_header("content-type", "text/html")
        .with_body(page("Home", &["/missing", "/about"]))
        .create_async()
        .await;
    let _about = server
        .mock("GET", "/about")
        .with_header("content-type", "text/html")
        .with_body(page("About", &[]))
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/missing")
        .with_status(404)
        .create_async()
        .await;

    let root = tempfile::tempdir().unwrap();
    let crawler =
        SiteCrawler::new(vec![server.url()], test_config(), false, root.path()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let outcome = crawler.run(rx).await.unwrap();

    assert_eq!(outcome.state.total_visited(), 2, "good pages still crawled");
    assert!(
        outcome.errors.iter().any(|e| e.subject.contains("/missing")),
        "the 404 is recorded as a per-URL error"
    );
    let stats = &outcome.state.domain("127.0.0.1").unwrap().stats;
    assert_eq!(stats.client_errors, 1);
}
