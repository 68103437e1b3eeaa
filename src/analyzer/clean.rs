//! Cleaning and enrichment of raw scanner output.
//!
//! Order is contractual: drop incomplete rows, normalize URLs and classify
//! page types, coerce impacts, deduplicate, join WCAG info, then tag funnel
//! membership and compute funnel-weighted severity.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SeverityWeights;
use crate::crawler::CrawlState;
use crate::scanner::{Impact, Violation};
use crate::urlnorm::{page_type, PageType, UrlNormalizer};

use super::wcag::{wcag_mapping, Principle};

/// A violation row after cleaning and enrichment.
#[derive(Debug, Clone, Serialize)]
pub struct CleanViolation {
    pub page_url: String,
    pub normalized_url: String,
    pub page_type: PageType,
    pub violation_id: String,
    pub impact: Impact,
    pub severity_score: u32,
    pub description: String,
    pub help: String,
    pub target_selector: String,
    pub html_fragment: String,
    pub failure_summary: String,
    pub auth_required: bool,
    pub wcag_principle: Principle,
    pub wcag_criterion: String,
    pub wcag_name: String,
    pub funnel_name: Option<String>,
    pub funnel_step: Option<String>,
    pub funnel_severity_score: f64,
    /// Template id of the page, when crawl state is available.
    pub template: Option<String>,
}

impl CleanViolation {
    #[must_use]
    pub fn is_in_funnel(&self) -> bool {
        self.funnel_name.is_some()
    }
}

/// Built-in funnel identification by URL path, used when a row carries no
/// explicit funnel metadata. Ordered; first match wins.
struct FunnelPattern {
    funnel: &'static str,
    step: &'static str,
    pattern: &'static str,
    multiplier: f64,
}

const FUNNEL_PATTERNS: &[FunnelPattern] = &[
    // checkout: issues here weigh double
    FunnelPattern { funnel: "checkout", step: "cart", pattern: r"/(cart|basket|bag)(/|$)", multiplier: 2.0 },
    FunnelPattern { funnel: "checkout", step: "checkout", pattern: r"/(checkout|order|shipping|address)(/|$)", multiplier: 2.0 },
    FunnelPattern { funnel: "checkout", step: "payment", pattern: r"/(payment|pay|billing)(/|$)", multiplier: 2.0 },
    FunnelPattern { funnel: "checkout", step: "confirmation", pattern: r"/(confirm|success|thank-you|ordine-confermato)", multiplier: 2.0 },
    // registration
    FunnelPattern { funnel: "registration", step: "register", pattern: r"/(register|sign-up|create-account|registrazione)", multiplier: 1.5 },
    FunnelPattern { funnel: "registration", step: "verification", pattern: r"/(verify|activate|verifica)", multiplier: 1.5 },
    // login
    FunnelPattern { funnel: "login", step: "login", pattern: r"/(login|sign-in|accedi)(/|$)", multiplier: 1.5 },
    FunnelPattern { funnel: "login", step: "account", pattern: r"/(account|my-account|area-personale)(/|$)", multiplier: 1.5 },
    // search/discovery
    FunnelPattern { funnel: "search", step: "search", pattern: r"/(search|find|cerca)(/|$)", multiplier: 1.2 },
    FunnelPattern { funnel: "search", step: "results", pattern: r"/(results|search-results)(/|$)", multiplier: 1.2 },
];

static COMPILED_FUNNEL_PATTERNS: Lazy<Vec<(Regex, &'static FunnelPattern)>> = Lazy::new(|| {
    FUNNEL_PATTERNS
        .iter()
        .map(|fp| {
            (
                Regex::new(&format!("(?i){}", fp.pattern)).expect("static funnel pattern compiles"),
                fp,
            )
        })
        .collect()
});

fn identify_funnel_step(path: &str) -> Option<(&'static str, &'static str, f64)> {
    for (regex, fp) in COMPILED_FUNNEL_PATTERNS.iter() {
        if regex.is_match(path) {
            return Some((fp.funnel, fp.step, fp.multiplier));
        }
    }
    None
}

/// The cleaning pipeline.
pub struct Cleaner<'a> {
    weights: SeverityWeights,
    normalizer: &'a UrlNormalizer,
    /// Severity multipliers for explicitly-named funnels (from config).
    funnel_multipliers: BTreeMap<String, f64>,
}

impl<'a> Cleaner<'a> {
    #[must_use]
    pub fn new(
        weights: SeverityWeights,
        normalizer: &'a UrlNormalizer,
        funnel_multipliers: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            weights,
            normalizer,
            funnel_multipliers,
        }
    }

    fn weight(&self, impact: Impact) -> u32 {
        match impact {
            Impact::Critical => self.weights.critical,
            Impact::Serious => self.weights.serious,
            Impact::Moderate => self.weights.moderate,
            Impact::Minor => self.weights.minor,
            Impact::Unknown => self.weights.unknown,
        }
    }

    /// Clean raw rows; `crawl` (when present) contributes the template join.
    #[must_use]
    pub fn clean(&self, violations: &[Violation], crawl: Option<&CrawlState>) -> Vec<CleanViolation> {
        let original = violations.len();

        // URL -> template map from the crawl state.
        let template_of: BTreeMap<String, String> = crawl
            .map(|state| {
                let mut map = BTreeMap::new();
                for domain_state in state.domain_data.values() {
                    for (template_id, cluster) in &domain_state.templates {
                        for member in &cluster.member_urls {
                            map.insert(
                                member.as_str().to_string(),
                                template_id.as_str().to_string(),
                            );
                        }
                    }
                }
                map
            })
            .unwrap_or_default();

        let mut seen: BTreeSet<(String, String, String)> = BTreeSet::new();
        let mut clean = Vec::with_capacity(violations.len());

        for violation in violations {
            // 1. Essential fields.
            if violation.violation_id.trim().is_empty() || violation.page_url.trim().is_empty() {
                continue;
            }

            // 2. Normalize + classify.
            let Ok(normalized) = self.normalizer.normalize(&violation.page_url) else {
                continue;
            };
            let normalized_url = normalized.as_str().to_string();
            let page_type = page_type(&normalized);

            // 3. Impact coercion happened at deserialization (`Impact::parse`
            //    maps anything unrecognized to Unknown); the weight joins here.
            let impact = violation.impact;
            let severity_score = self.weight(impact);

            // 4. Deduplicate, fragment included when present.
            let key = (
                normalized_url.clone(),
                violation.violation_id.clone(),
                violation.html_fragment.clone(),
            );
            if !seen.insert(key) {
                continue;
            }

            // 5. WCAG join.
            let mapping = wcag_mapping(&violation.violation_id);

            // 6. Funnel tagging: explicit metadata wins, URL patterns fill in.
            let (funnel_name, funnel_step, multiplier) = match (&violation.funnel_name, &violation.funnel_step) {
                (Some(name), step) => {
                    let multiplier = self
                        .funnel_multipliers
                        .get(name)
                        .copied()
                        .unwrap_or(1.0);
                    (Some(name.clone()), step.clone(), multiplier)
                }
                _ => match identify_funnel_step(normalized.path()) {
                    Some((name, step, multiplier)) => {
                        let configured = self.funnel_multipliers.get(name).copied();
                        (
                            Some(name.to_string()),
                            Some(step.to_string()),
                            configured.unwrap_or(multiplier),
                        )
                    }
                    None => (None, None, 1.0),
                },
            };
            let funnel_severity_score = f64::from(severity_score)
                * if funnel_name.is_some() { multiplier } else { 1.0 };

            let template = template_of.get(&normalized_url).cloned();
            clean.push(CleanViolation {
                page_url: violation.page_url.clone(),
                normalized_url,
                page_type,
                violation_id: violation.violation_id.clone(),
                impact,
                severity_score,
                description: violation.description.clone(),
                help: violation.help.clone(),
                target_selector: violation.target_selector.clone(),
                html_fragment: violation.html_fragment.clone(),
                failure_summary: violation.failure_summary.clone(),
                auth_required: violation.auth_required,
                wcag_principle: mapping.principle,
                wcag_criterion: mapping.criterion.to_string(),
                wcag_name: mapping.name.to_string(),
                funnel_name,
                funnel_step: funnel_step.or_else(|| violation.funnel_step.clone()),
                funnel_severity_score,
                template,
            });
        }

        // Deterministic output order regardless of scanner merge order.
        clean.sort_by(|a, b| {
            a.normalized_url
                .cmp(&b.normalized_url)
                .then_with(|| a.violation_id.cmp(&b.violation_id))
                .then_with(|| a.target_selector.cmp(&b.target_selector))
                .then_with(|| a.html_fragment.cmp(&b.html_fragment))
        });

        let dropped = original - clean.len();
        if dropped > 0 {
            debug!("cleaning dropped {dropped} incomplete or duplicate rows");
        }
        let funnel_rows = clean.iter().filter(|c| c.is_in_funnel()).count();
        info!(
            "cleaned {} rows ({} funnel-related) from {original} raw",
            clean.len(),
            funnel_rows
        );
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(url: &str, id: &str, impact: Impact, html: &str) -> Violation {
        Violation {
            page_url: url.to_string(),
            violation_id: id.to_string(),
            impact,
            description: String::new(),
            help: String::new(),
            target_selector: "div".to_string(),
            html_fragment: html.to_string(),
            failure_summary: String::new(),
            auth_required: false,
            funnel_name: None,
            funnel_step: None,
            step_number: None,
        }
    }

    fn cleaner(normalizer: &UrlNormalizer) -> Cleaner<'_> {
        Cleaner::new(SeverityWeights::default(), normalizer, BTreeMap::new())
    }

    #[test]
    fn drops_rows_missing_essentials() {
        let normalizer = UrlNormalizer::new(false);
        let rows = vec![
            raw("https://e.test/a", "image-alt", Impact::Critical, "<img>"),
            raw("", "image-alt", Impact::Critical, "<img>"),
            raw("https://e.test/a", "", Impact::Critical, "<img>"),
        ];
        let clean = cleaner(&normalizer).clean(&rows, None);
        assert_eq!(clean.len(), 1);
    }

    #[test]
    fn dedup_includes_html_fragment() {
        let normalizer = UrlNormalizer::new(false);
        let rows = vec![
            raw("https://e.test/a", "image-alt", Impact::Critical, "<img src=1>"),
            raw("https://e.test/a/", "image-alt", Impact::Critical, "<img src=1>"),
            raw("https://e.test/a", "image-alt", Impact::Critical, "<img src=2>"),
        ];
        let clean = cleaner(&normalizer).clean(&rows, None);
        // Same page+rule+fragment collapses; a distinct fragment survives.
        assert_eq!(clean.len(), 2);
    }

    #[test]
    fn enrichment_joins_wcag_and_weights() {
        let normalizer = UrlNormalizer::new(false);
        let rows = vec![raw(
            "https://e.test/products/1",
            "color-contrast",
            Impact::Serious,
            "<a>low</a>",
        )];
        let clean = cleaner(&normalizer).clean(&rows, None);
        let row = &clean[0];
        assert_eq!(row.severity_score, 3);
        assert_eq!(row.wcag_criterion, "1.4.3");
        assert_eq!(row.wcag_principle, Principle::Perceivable);
        assert_eq!(row.page_type, PageType::Product);
    }

    #[test]
    fn funnel_tagging_from_url_patterns() {
        let normalizer = UrlNormalizer::new(false);
        let rows = vec![raw(
            "https://e.test/checkout/payment",
            "label",
            Impact::Moderate,
            "<input>",
        )];
        let clean = cleaner(&normalizer).clean(&rows, None);
        let row = &clean[0];
        assert_eq!(row.funnel_name.as_deref(), Some("checkout"));
        // moderate=2 doubled by the checkout multiplier
        assert!((row.funnel_severity_score - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn explicit_funnel_metadata_wins_over_patterns() {
        let normalizer = UrlNormalizer::new(false);
        let mut violation = raw("https://e.test/cart", "label", Impact::Minor, "<input>");
        violation.funnel_name = Some("custom-journey".to_string());
        violation.funnel_step = Some("step-2".to_string());

        let multipliers = BTreeMap::from([("custom-journey".to_string(), 3.0)]);
        let cleaner = Cleaner::new(SeverityWeights::default(), &normalizer, multipliers);
        let clean = cleaner.clean(&[violation], None);
        let row = &clean[0];
        assert_eq!(row.funnel_name.as_deref(), Some("custom-journey"));
        assert_eq!(row.funnel_step.as_deref(), Some("step-2"));
        assert!((row.funnel_severity_score - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_impact_scores_zero() {
        let normalizer = UrlNormalizer::new(false);
        let rows = vec![raw("https://e.test/a", "new-rule", Impact::Unknown, "<p>")];
        let clean = cleaner(&normalizer).clean(&rows, None);
        assert_eq!(clean[0].severity_score, 0);
        assert_eq!(clean[0].wcag_principle, Principle::Other);
    }

    #[test]
    fn output_order_is_deterministic() {
        let normalizer = UrlNormalizer::new(false);
        let a = raw("https://e.test/b", "label", Impact::Minor, "<x>");
        let b = raw("https://e.test/a", "image-alt", Impact::Minor, "<y>");
        let forward = cleaner(&normalizer).clean(&[a.clone(), b.clone()], None);
        let backward = cleaner(&normalizer).clean(&[b, a], None);
        let forward_keys: Vec<_> = forward.iter().map(|c| c.normalized_url.clone()).collect();
        let backward_keys: Vec<_> = backward.iter().map(|c| c.normalized_url.clone()).collect();
        assert_eq!(forward_keys, backward_keys);
    }
}
