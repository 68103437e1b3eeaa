//! Template projection: estimating site-wide impact from representative
//! pages.
//!
//! For each cluster, the violations found on its representative URL are
//! multiplied by the cluster's occurrence count. The numbers are estimates
//! and every row says so.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::SeverityWeights;
use crate::crawler::CrawlState;
use crate::scanner::Impact;

use super::aggregate::ImpactCounts;
use super::clean::CleanViolation;

const PROJECTION_NOTE: &str = "Projected values estimate total impact based on violations \
     found on the representative URL multiplied by the template's occurrence count.";

#[derive(Debug, Clone, Serialize)]
pub struct TemplateProjectionRow {
    pub template: String,
    pub representative_url: String,
    pub occurrence_count: usize,
    /// Violations observed on the representative page itself.
    pub sample_violations: usize,
    pub projected_total: usize,
    pub projected_critical: usize,
    pub projected_serious: usize,
    pub projected_moderate: usize,
    pub projected_minor: usize,
    pub priority_score: f64,
    pub criticality: Criticality,
    pub note: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Criticality {
    High,
    Medium,
    Low,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Project every cluster with at least one occurrence.
#[must_use]
pub fn project_templates(
    clean: &[CleanViolation],
    crawl: &CrawlState,
    weights: &SeverityWeights,
) -> Vec<TemplateProjectionRow> {
    // Violations indexed by normalized page URL.
    let mut by_page: BTreeMap<&str, Vec<&CleanViolation>> = BTreeMap::new();
    for row in clean {
        by_page.entry(row.normalized_url.as_str()).or_default().push(row);
    }

    let mut rows = Vec::new();
    for domain_state in crawl.domain_data.values() {
        for (template_id, cluster) in &domain_state.templates {
            let occurrence = cluster.count;
            if occurrence == 0 {
                continue;
            }

            let rep = cluster.representative_url.as_str();
            let sample: &[&CleanViolation] =
                by_page.get(rep).map(Vec::as_slice).unwrap_or_default();

            let mut counts = ImpactCounts::default();
            for violation in sample {
                counts.add(violation.impact);
            }

            let projected_critical = counts.critical * occurrence;
            let projected_serious = counts.serious * occurrence;
            let projected_moderate = counts.moderate * occurrence;
            let projected_minor = counts.minor * occurrence;
            let projected_total = sample.len() * occurrence;

            let projected_points = projected_critical as u64 * u64::from(weights.critical)
                + projected_serious as u64 * u64::from(weights.serious)
                + projected_moderate as u64 * u64::from(weights.moderate)
                + projected_minor as u64 * u64::from(weights.minor);
            let priority_score = projected_points as f64 / occurrence as f64;

            let criticality = if priority_score >= f64::from(weights.serious) {
                Criticality::High
            } else if priority_score >= f64::from(weights.moderate) {
                Criticality::Medium
            } else {
                Criticality::Low
            };

            rows.push(TemplateProjectionRow {
                template: template_id.as_str().to_string(),
                representative_url: rep.to_string(),
                occurrence_count: occurrence,
                sample_violations: sample.len(),
                projected_total,
                projected_critical,
                projected_serious,
                projected_moderate,
                projected_minor,
                priority_score: round2(priority_score),
                criticality,
                note: PROJECTION_NOTE,
            });
        }
    }

    rows.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.template.cmp(&b.template))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::clean::Cleaner;
    use crate::scanner::Violation;
    use crate::template::{template_fingerprint, TemplateId};
    use crate::urlnorm::{NormalizedUrl, UrlNormalizer};

    fn url(raw: &str) -> NormalizedUrl {
        NormalizedUrl::parse(raw, false).unwrap()
    }

    fn raw_violation(page: &str, id: &str, impact: Impact) -> Violation {
        Violation {
            page_url: page.to_string(),
            violation_id: id.to_string(),
            impact,
            description: String::new(),
            help: String::new(),
            target_selector: "div".to_string(),
            html_fragment: format!("<div data-rule=\"{id}\"></div>"),
            failure_summary: String::new(),
            auth_required: false,
            funnel_name: None,
            funnel_step: None,
            step_number: None,
        }
    }

    fn product_template() -> TemplateId {
        template_fingerprint("e.test", "<html><body><main><h1>p</h1></main></body></html>")
    }

    fn crawl_with_cluster(members: &[&str]) -> CrawlState {
        let mut state = CrawlState::default();
        let domain = state.domain_mut("e.test");
        for member in members {
            domain.record_page(&url(member), product_template(), None, None);
        }
        state
    }

    #[test]
    fn projection_multiplies_representative_counts() {
        // 100 product pages, one representative scanned.
        let members: Vec<String> =
            (0..100).map(|i| format!("https://e.test/products/item-{i:03}")).collect();
        let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();
        let crawl = crawl_with_cluster(&member_refs);

        let cluster = crawl.domain("e.test").unwrap().templates.values().next().unwrap();
        let rep = cluster.representative_url.as_str().to_string();

        let normalizer = UrlNormalizer::new(false);
        let clean = Cleaner::new(SeverityWeights::default(), &normalizer, Default::default())
            .clean(
                &[
                    raw_violation(&rep, "image-alt", Impact::Critical),
                    raw_violation(&rep, "label", Impact::Minor),
                ],
                Some(&crawl),
            );

        let rows = project_templates(&clean, &crawl, &SeverityWeights::default());
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.occurrence_count, 100);
        assert_eq!(row.sample_violations, 2);
        assert_eq!(row.projected_total, 200);
        assert_eq!(row.projected_critical, 100);
        assert_eq!(row.projected_minor, 100);
        // (100*4 + 100*1) / 100 = 5 average points per page.
        assert!((row.priority_score - 5.0).abs() < 1e-9);
        assert_eq!(row.criticality, Criticality::High);
    }

    #[test]
    fn clean_representative_yields_low_criticality() {
        let crawl = crawl_with_cluster(&["https://e.test/products/a", "https://e.test/products/b"]);
        let rows = project_templates(&[], &crawl, &SeverityWeights::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sample_violations, 0);
        assert_eq!(rows[0].projected_total, 0);
        assert_eq!(rows[0].criticality, Criticality::Low);
    }

    #[test]
    fn criticality_thresholds_follow_weights() {
        let crawl = crawl_with_cluster(&["https://e.test/products/a"]);
        let rep = crawl
            .domain("e.test")
            .unwrap()
            .templates
            .values()
            .next()
            .unwrap()
            .representative_url
            .as_str()
            .to_string();

        let normalizer = UrlNormalizer::new(false);
        let clean = Cleaner::new(SeverityWeights::default(), &normalizer, Default::default())
            .clean(&[raw_violation(&rep, "label", Impact::Moderate)], Some(&crawl));
        let rows = project_templates(&clean, &crawl, &SeverityWeights::default());
        // One moderate violation -> 2 points per page -> Medium.
        assert_eq!(rows[0].criticality, Criticality::Medium);
    }
}
