//! Analyzer end-to-end behavior: projection, funnel sheets, empty input,
//! determinism.

use axe_audit::analyzer::{AccessibilityAnalyzer, LEVEL_NO_PAGES};
use axe_audit::config::ScoringConfig;
use axe_audit::crawler::CrawlState;
use axe_audit::funnel::{FunnelArtifacts, StepResult};
use axe_audit::scanner::{Impact, Violation};
use axe_audit::template::template_fingerprint;
use axe_audit::urlnorm::NormalizedUrl;

fn violation(url: &str, id: &str, impact: Impact, fragment: &str) -> Violation {
    Violation {
        page_url: url.to_string(),
        violation_id: id.to_string(),
        impact,
        description: format!("{id} description"),
        help: String::new(),
        target_selector: "div".to_string(),
        html_fragment: fragment.to_string(),
        failure_summary: String::new(),
        auth_required: false,
        funnel_name: None,
        funnel_step: None,
        step_number: None,
    }
}

fn url(raw: &str) -> NormalizedUrl {
    NormalizedUrl::parse(raw, true).unwrap()
}

#[test]
fn projection_multiplies_by_occurrence_count() {
    // 100 product pages sharing one template; the representative carries
    // two violations.
    let mut crawl = CrawlState::default();
    let domain = crawl.domain_mut("e.test");
    let product = template_fingerprint(
        "e.test",
        "<html><body><main><h1>p</h1></main></body></html>",
    );
    let other = template_fingerprint(
        "e.test",
        "<html><body><main><h1>h</h1><h2>x</h2></main></body></html>",
    );
    for i in 0..100 {
        domain.record_page(&url(&format!("https://e.test/products/item-{i:03}")), product.clone(), None, None);
    }
    domain.record_page(&url("https://e.test/"), other, None, None);

    let rep = crawl
        .domain("e.test")
        .unwrap()
        .templates
        .values()
        .find(|c| c.count == 100)
        .unwrap()
        .representative_url
        .as_str()
        .to_string();

    let violations = vec![
        violation(&rep, "image-alt", Impact::Critical, "<img a>"),
        violation(&rep, "label", Impact::Minor, "<input b>"),
    ];

    let analyzer = AccessibilityAnalyzer::new(ScoringConfig::default(), true);
    let report = analyzer.analyze("e.test", &violations, Some(&crawl), &[]);

    let row = report
        .template_projection
        .iter()
        .find(|r| r.occurrence_count == 100)
        .expect("projected template row");
    assert_eq!(row.sample_violations, 2);
    assert_eq!(row.projected_total, 200);
    assert_eq!(row.projected_critical, 100);
    assert_eq!(row.projected_minor, 100);
    assert_eq!(row.note.is_empty(), false, "projection is labeled estimated");

    let workbook = report.to_workbook().unwrap();
    assert!(workbook.sheet("Template Projection").is_some());
}

#[test]
fn funnel_partial_failure_surfaces_in_report() {
    // A 4-step checkout funnel that failed at step 3: three artifacts,
    // results [true, true, false].
    let runs = vec![FunnelArtifacts {
        funnel_id: "checkout".to_string(),
        total_steps: 4,
        steps_completed: 2,
        artifacts: Vec::new(),
        results: vec![
            StepResult { step: "cart".into(), url: "https://e.test/cart".into(), success: true },
            StepResult { step: "address".into(), url: "https://e.test/checkout".into(), success: true },
            StepResult { step: "payment".into(), url: "https://e.test/payment".into(), success: false },
        ],
    }];

    let violations = vec![
        {
            let mut v = violation("https://e.test/cart", "label", Impact::Serious, "<input>");
            v.funnel_name = Some("checkout".to_string());
            v.funnel_step = Some("cart".to_string());
            v.step_number = Some(1);
            v
        },
    ];

    let analyzer = AccessibilityAnalyzer::new(ScoringConfig::default(), true);
    let report = analyzer.analyze("e.test", &violations, None, &runs);

    assert_eq!(report.funnel_executions.len(), 1);
    let execution = &report.funnel_executions[0];
    assert_eq!(execution.steps_completed, 2);
    assert_eq!(execution.total_steps, 4);

    let workbook = report.to_workbook().unwrap();
    let sheet = workbook.sheet("Funnel Analysis").expect("funnel sheet");
    assert!(sheet
        .rows
        .iter()
        .any(|row| row.get("steps_completed") == Some(&serde_json::json!(2))));
    assert!(!report.aggregations.by_funnel.is_empty());
}

#[test]
fn empty_violation_set_yields_na_level() {
    let analyzer = AccessibilityAnalyzer::new(ScoringConfig::default(), true);
    let report = analyzer.analyze("e.test", &[], None, &[]);
    assert_eq!(report.conformance.level, LEVEL_NO_PAGES);
    assert_eq!(report.conformance.unique_pages, 0);
    for metric in &report.summary {
        if metric.metric.ends_with("Violations") {
            assert_eq!(metric.value, serde_json::json!(0), "{}", metric.metric);
        }
    }
}

#[test]
fn analyzer_runs_are_byte_identical() {
    let violations = vec![
        violation("https://e.test/", "image-alt", Impact::Critical, "<img>"),
        violation("https://e.test/cart", "color-contrast", Impact::Serious, "<a>"),
        violation("https://e.test/about", "label", Impact::Moderate, "<input>"),
    ];
    let analyzer = AccessibilityAnalyzer::new(ScoringConfig::default(), true);
    let a = analyzer.analyze("e.test", &violations, None, &[]);
    let b = analyzer.analyze("e.test", &violations, None, &[]);
    assert_eq!(
        serde_json::to_vec(&a.aggregations).unwrap(),
        serde_json::to_vec(&b.aggregations).unwrap()
    );
    assert_eq!(
        serde_json::to_vec(&a.raw).unwrap(),
        serde_json::to_vec(&b.raw).unwrap()
    );
}

#[test]
fn conformance_is_monotonic() {
    let analyzer = AccessibilityAnalyzer::new(ScoringConfig::default(), true);
    let base = vec![violation("https://e.test/", "label", Impact::Minor, "<i1>")];
    let mut worse = base.clone();
    worse.push(violation("https://e.test/", "image-alt", Impact::Critical, "<i2>"));

    let base_score = analyzer.analyze("e.test", &base, None, &[]).conformance.score;
    let worse_score = analyzer.analyze("e.test", &worse, None, &[]).conformance.score;
    assert!(worse_score < base_score);
    assert!((0.0..=100.0).contains(&base_score));
    assert!((0.0..=100.0).contains(&worse_score));
}
