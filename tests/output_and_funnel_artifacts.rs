//! Output layout and funnel artifact contracts.

use axe_audit::funnel::{Action, FunnelArtifacts, FunnelDefinition, SuccessCondition};
use axe_audit::output::{archive_previous_run, Component, OutputLayout};

#[test]
fn directory_layout_matches_contract() {
    let root = tempfile::tempdir().unwrap();
    let layout = OutputLayout::create(root.path(), "Shop.Example.com").unwrap();

    let base = root.path().join("shop_example_com");
    for dir in [
        "crawler_output",
        "axe_output",
        "analysis_output",
        "reports",
        "logs",
        "charts",
        "temp",
        "screenshots",
        "funnels",
    ] {
        assert!(base.join(dir).is_dir(), "missing {dir}");
    }
    assert_eq!(
        layout.crawler_state_path(),
        base.join("crawler_output").join("crawler_state_shop_example_com.json")
    );
}

#[test]
fn archives_land_under_runs_with_timestamp() {
    let root = tempfile::tempdir().unwrap();
    let layout = OutputLayout::create(root.path(), "e.test").unwrap();
    layout
        .atomic_write(&layout.path(Component::Reports, "old.json"), b"{}")
        .unwrap();

    let archived = archive_previous_run(root.path(), "e.test")
        .unwrap()
        .expect("archived");
    let name = archived.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("e_test_"));
    assert!(archived.parent().unwrap().ends_with("runs"));
}

#[test]
fn funnel_definition_parses_from_config_json() {
    let json = r##"{
        "id": "checkout",
        "domain": "e.test",
        "auth_required": true,
        "severity_multiplier": 2.0,
        "steps": [
            {
                "name": "cart",
                "url": "https://e.test/cart",
                "actions": [
                    {"type": "cookie_banner"},
                    {"type": "click", "selector": ".add-to-cart"},
                    {"type": "wait", "seconds": 1.5}
                ],
                "success_condition": {"type": "element_visible", "selector": ".cart-count"}
            },
            {
                "name": "payment",
                "wait_for_selector": "#payment-form",
                "actions": [
                    {"type": "input", "selector": "#card", "value": "4111111111111111"},
                    {"type": "submit_form", "selector": "#payment-form"}
                ],
                "success_condition": {"type": "url_contains", "text": "/confirm"},
                "timeout_secs": 45
            }
        ]
    }"##;
    let funnel: FunnelDefinition = serde_json::from_str(json).unwrap();
    assert_eq!(funnel.steps.len(), 2);
    assert!(funnel.auth_required);
    assert!(matches!(funnel.steps[0].actions[0], Action::CookieBanner));
    assert!(matches!(
        funnel.steps[1].success_condition,
        Some(SuccessCondition::UrlContains { .. })
    ));
    assert_eq!(funnel.steps[1].timeout_secs, 45);
}

#[test]
fn funnel_results_round_trip_and_expose_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("step_1_cart.html");
    std::fs::write(&snapshot, "<html><body>cart</body></html>").unwrap();
    let missing = dir.path().join("step_2_gone.html");

    let artifacts = FunnelArtifacts {
        funnel_id: "checkout".to_string(),
        total_steps: 4,
        steps_completed: 1,
        artifacts: vec![
            axe_audit::funnel::FunnelArtifact {
                funnel_id: "checkout".to_string(),
                step_index: 0,
                step_name: "cart".to_string(),
                url: "https://e.test/cart".to_string(),
                html_snapshot_path: snapshot,
                screenshot_path: None,
                success: true,
            },
            axe_audit::funnel::FunnelArtifact {
                funnel_id: "checkout".to_string(),
                step_index: 1,
                step_name: "gone".to_string(),
                url: "https://e.test/x".to_string(),
                html_snapshot_path: missing,
                screenshot_path: None,
                success: false,
            },
        ],
        results: Vec::new(),
    };

    // Serde round trip (this is what results.json holds).
    let body = serde_json::to_string_pretty(&artifacts).unwrap();
    let back: FunnelArtifacts = serde_json::from_str(&body).unwrap();
    assert_eq!(back.total_steps, 4);

    // Only on-disk snapshots flow to the scanner; the failed step's
    // snapshot counts when it exists.
    let scannable = back.scannable_snapshots();
    assert_eq!(scannable.len(), 1);
    assert_eq!(scannable[0].step_name, "cart");
}
