//! The crawl-state file is the durable contract between stages.

use axe_audit::crawler::CrawlState;
use axe_audit::output::OutputLayout;
use axe_audit::template::template_fingerprint;
use axe_audit::urlnorm::NormalizedUrl;

fn url(raw: &str) -> NormalizedUrl {
    NormalizedUrl::parse(raw, false).unwrap()
}

fn populated_state() -> CrawlState {
    let mut state = CrawlState::default();
    let domain = state.domain_mut("e.test");
    let home = template_fingerprint("e.test", "<html><body><main><h1>h</h1></main></body></html>");
    let product = template_fingerprint(
        "e.test",
        "<html><body><main><h1>h</h1><h2>a</h2></main></body></html>",
    );
    domain.record_page(&url("https://e.test/"), home, Some("e.test:/".into()), None);
    domain.record_page(
        &url("https://e.test/products/1"),
        product.clone(),
        Some("e.test:/products/{num}".into()),
        Some(&url("https://e.test/")),
    );
    domain.record_page(
        &url("https://e.test/products/2"),
        product,
        None,
        Some(&url("https://e.test/")),
    );
    domain.stats.success = 3;
    state
}

#[test]
fn required_top_level_keys_are_present() {
    let state = populated_state();
    let json = serde_json::to_value(&state).unwrap();
    let domain = &json["domain_data"]["e.test"];
    for key in ["structures", "visited", "url_tree", "stats"] {
        assert!(domain.get(key).is_some(), "missing contract key {key}");
    }
    // Cluster entries expose representative URL and count.
    let structures = domain["structures"].as_object().unwrap();
    let (_, cluster) = structures.iter().next().unwrap();
    assert!(cluster.get("representative_url").is_some());
    assert!(cluster.get("count").is_some());
}

#[test]
fn disk_round_trip_preserves_counts() {
    let root = tempfile::tempdir().unwrap();
    let layout = OutputLayout::create(root.path(), "e.test").unwrap();
    let state = populated_state();
    state.save(&layout).unwrap();

    let loaded = CrawlState::load(&layout.crawler_state_path()).unwrap();
    assert_eq!(loaded.total_visited(), 3);
    assert_eq!(loaded.total_templates(), 2);
    let domain = loaded.domain("e.test").unwrap();
    assert_eq!(domain.stats.success, 3);
    assert_eq!(
        domain.url_tree["https://e.test/"].len(),
        2,
        "url tree edges survive"
    );

    // The product cluster kept its representative invariants.
    let product_cluster = domain
        .templates
        .values()
        .find(|c| c.count == 2)
        .expect("product cluster");
    assert!(product_cluster.is_consistent());
    assert_eq!(
        product_cluster.representative_url.as_str(),
        "https://e.test/products/1"
    );
}

#[test]
fn reload_is_idempotent_for_visited_counts() {
    // Resume law: loading and re-saving does not grow the visited set.
    let root = tempfile::tempdir().unwrap();
    let layout = OutputLayout::create(root.path(), "e.test").unwrap();
    populated_state().save(&layout).unwrap();

    let first = CrawlState::load(&layout.crawler_state_path()).unwrap();
    let before = first.total_visited();
    first.save(&layout).unwrap();
    let second = CrawlState::load(&layout.crawler_state_path()).unwrap();
    assert_eq!(second.total_visited(), before);
}

#[test]
fn atomic_checkpoints_never_leave_partial_files() {
    let root = tempfile::tempdir().unwrap();
    let layout = OutputLayout::create(root.path(), "e.test").unwrap();
    let state = populated_state();

    // Overwrite repeatedly; every intermediate read must parse.
    for _ in 0..5 {
        state.save(&layout).unwrap();
        let body = std::fs::read_to_string(layout.crawler_state_path()).unwrap();
        serde_json::from_str::<serde_json::Value>(&body).expect("file is whole JSON");
    }
}
