//! Heuristic conformance score.
//!
//! Not a legal determination: a 0-100 summary whose decay is driven by the
//! average severity per page and the fraction of pages carrying any
//! critical violation. The constants are configurable but the defaults are
//! contractual, since scores are compared across runs.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::ScoringConfig;
use crate::scanner::Impact;

use super::clean::CleanViolation;

pub const LEVEL_NO_PAGES: &str = "N/A (No pages analyzed)";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Conformance {
    /// 0-100, higher is better.
    pub score: f64,
    pub level: String,
    /// Average severity points per unique page.
    pub weighted_violation_score: f64,
    /// Fraction of pages with at least one critical violation.
    pub critical_fraction: f64,
    pub unique_pages: usize,
    /// Set when the scoring knobs deviate from the contractual defaults.
    pub custom_weights: bool,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn level_for(score: f64) -> &'static str {
    if score >= 95.0 {
        "AA (potential)"
    } else if score >= 85.0 {
        "A (potential)"
    } else if score >= 70.0 {
        "Non-conformant (minor)"
    } else if score >= 40.0 {
        "Non-conformant (moderate)"
    } else {
        "Non-conformant (major)"
    }
}

/// Score a cleaned violation set.
#[must_use]
pub fn conformance(clean: &[CleanViolation], scoring: &ScoringConfig) -> Conformance {
    let unique_pages: BTreeSet<&str> = clean.iter().map(|c| c.normalized_url.as_str()).collect();
    let page_count = unique_pages.len();

    if page_count == 0 {
        return Conformance {
            score: 0.0,
            level: LEVEL_NO_PAGES.to_string(),
            weighted_violation_score: 0.0,
            critical_fraction: 0.0,
            unique_pages: 0,
            custom_weights: scoring.is_custom(),
        };
    }

    let total_points: u64 = clean.iter().map(|c| u64::from(c.severity_score)).sum();
    let weighted = total_points as f64 / page_count as f64;

    let pages_with_critical: BTreeSet<&str> = clean
        .iter()
        .filter(|c| c.impact == Impact::Critical)
        .map(|c| c.normalized_url.as_str())
        .collect();
    let critical_fraction = pages_with_critical.len() as f64 / page_count as f64;

    let reduction = (weighted * scoring.severity_weight_factor
        + critical_fraction * scoring.critical_penalty_factor)
        .min(100.0);
    let score = (100.0 - reduction).max(0.0);

    Conformance {
        score: round1(score),
        level: level_for(score).to_string(),
        weighted_violation_score: round2(weighted),
        critical_fraction: round2(critical_fraction),
        unique_pages: page_count,
        custom_weights: scoring.is_custom(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::clean::Cleaner;
    use crate::config::SeverityWeights;
    use crate::scanner::Violation;
    use crate::urlnorm::UrlNormalizer;

    fn rows(spec: &[(&str, Impact)]) -> Vec<CleanViolation> {
        let raw: Vec<Violation> = spec
            .iter()
            .enumerate()
            .map(|(i, (url, impact))| Violation {
                page_url: (*url).to_string(),
                violation_id: format!("rule-{i}"),
                impact: *impact,
                description: String::new(),
                help: String::new(),
                target_selector: "div".to_string(),
                html_fragment: format!("<div id={i}>"),
                failure_summary: String::new(),
                auth_required: false,
                funnel_name: None,
                funnel_step: None,
                step_number: None,
            })
            .collect();
        let normalizer = UrlNormalizer::new(false);
        Cleaner::new(SeverityWeights::default(), &normalizer, Default::default())
            .clean(&raw, None)
    }

    #[test]
    fn empty_input_is_not_applicable() {
        let result = conformance(&[], &ScoringConfig::default());
        assert_eq!(result.level, LEVEL_NO_PAGES);
        assert_eq!(result.unique_pages, 0);
        assert!((result.score - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clean_pages_score_high() {
        // One minor violation on one page: weighted = 1, no criticals.
        let clean = rows(&[("https://e.test/a", Impact::Minor)]);
        let result = conformance(&clean, &ScoringConfig::default());
        // 100 - (1*2 + 0*20) = 98 -> AA (potential)
        assert!((result.score - 98.0).abs() < 1e-9);
        assert_eq!(result.level, "AA (potential)");
    }

    #[test]
    fn critical_pages_drag_the_score_down() {
        let clean = rows(&[
            ("https://e.test/a", Impact::Critical),
            ("https://e.test/b", Impact::Minor),
        ]);
        let result = conformance(&clean, &ScoringConfig::default());
        // weighted = (4+1)/2 = 2.5; critical_frac = 0.5
        // reduction = 2.5*2 + 0.5*20 = 15 -> score 85 -> A (potential)
        assert!((result.score - 85.0).abs() < 1e-9);
        assert_eq!(result.level, "A (potential)");
        assert!((result.critical_fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped_to_zero() {
        let spec: Vec<(String, Impact)> = (0..60)
            .map(|i| (format!("https://e.test/p{}", i % 2), Impact::Critical))
            .collect();
        let borrowed: Vec<(&str, Impact)> =
            spec.iter().map(|(u, i)| (u.as_str(), *i)).collect();
        let clean = rows(&borrowed);
        let result = conformance(&clean, &ScoringConfig::default());
        assert!((result.score - 0.0).abs() < f64::EPSILON);
        assert_eq!(result.level, "Non-conformant (major)");
    }

    #[test]
    fn score_is_monotonic_in_severity() {
        let lighter = rows(&[("https://e.test/a", Impact::Minor)]);
        let heavier = rows(&[
            ("https://e.test/a", Impact::Minor),
            ("https://e.test/a", Impact::Serious),
        ]);
        let light_score = conformance(&lighter, &ScoringConfig::default()).score;
        let heavy_score = conformance(&heavier, &ScoringConfig::default()).score;
        assert!(heavy_score < light_score);
    }

    #[test]
    fn custom_factors_are_flagged() {
        let scoring = ScoringConfig {
            severity_weight_factor: 3.0,
            ..ScoringConfig::default()
        };
        let clean = rows(&[("https://e.test/a", Impact::Minor)]);
        let result = conformance(&clean, &scoring);
        assert!(result.custom_weights);
        // 100 - 1*3 = 97
        assert!((result.score - 97.0).abs() < 1e-9);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level_for(95.0), "AA (potential)");
        assert_eq!(level_for(94.9), "A (potential)");
        assert_eq!(level_for(85.0), "A (potential)");
        assert_eq!(level_for(70.0), "Non-conformant (minor)");
        assert_eq!(level_for(40.0), "Non-conformant (moderate)");
        assert_eq!(level_for(39.9), "Non-conformant (major)");
    }
}
