//! Aggregation tables over cleaned violations.
//!
//! Every table is a vector of typed rows in a deterministic order, so
//! running the analyzer twice over the same input yields byte-identical
//! serializations.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::SeverityWeights;
use crate::scanner::Impact;
use crate::urlnorm::PageType;

use super::clean::CleanViolation;
use super::solutions::solution_for;
use super::wcag::Principle;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn weight_of(weights: &SeverityWeights, impact: Impact) -> u32 {
    match impact {
        Impact::Critical => weights.critical,
        Impact::Serious => weights.serious,
        Impact::Moderate => weights.moderate,
        Impact::Minor => weights.minor,
        Impact::Unknown => weights.unknown,
    }
}

/// Per-impact counters used inside several tables.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ImpactCounts {
    pub critical: usize,
    pub serious: usize,
    pub moderate: usize,
    pub minor: usize,
    pub unknown: usize,
}

impl ImpactCounts {
    pub fn add(&mut self, impact: Impact) {
        match impact {
            Impact::Critical => self.critical += 1,
            Impact::Serious => self.serious += 1,
            Impact::Moderate => self.moderate += 1,
            Impact::Minor => self.minor += 1,
            Impact::Unknown => self.unknown += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.critical + self.serious + self.moderate + self.minor + self.unknown
    }

    /// Weighted severity points, `unknown` excluded by its zero weight.
    #[must_use]
    pub fn severity_points(&self, weights: &SeverityWeights) -> u64 {
        self.critical as u64 * u64::from(weights.critical)
            + self.serious as u64 * u64::from(weights.serious)
            + self.moderate as u64 * u64::from(weights.moderate)
            + self.minor as u64 * u64::from(weights.minor)
            + self.unknown as u64 * u64::from(weights.unknown)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactRow {
    pub impact: Impact,
    pub total_violations: usize,
    pub unique_pages: usize,
    pub percentage: f64,
    pub avg_across_all_pages: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageRow {
    pub normalized_url: String,
    pub display_url: String,
    pub page_type: PageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub total_violations: usize,
    #[serde(flatten)]
    pub counts: ImpactCounts,
    pub priority_score: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationRow {
    pub violation_id: String,
    pub most_common_impact: Impact,
    pub wcag_principle: Principle,
    pub wcag_criterion: String,
    pub wcag_name: String,
    pub total_occurrences: usize,
    pub affected_pages: usize,
    pub priority_score: u64,
    pub percentage: f64,
    pub solution_description: String,
    pub technical_solution: String,
    pub user_impact: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageTypeRow {
    pub page_type: PageType,
    pub total_pages: usize,
    pub total_violations: usize,
    #[serde(flatten)]
    pub counts: ImpactCounts,
    pub most_common_violation: String,
    pub avg_violations_per_page: f64,
    pub priority_score: f64,
    pub top_wcag_principle: Principle,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateRow {
    pub template: String,
    pub pages: usize,
    pub total_violations: usize,
    #[serde(flatten)]
    pub counts: ImpactCounts,
    pub unique_violations: usize,
    pub top_violation: String,
    pub top_wcag_principle: Principle,
    pub avg_violations_per_page: f64,
    pub priority_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelRow {
    pub funnel_name: String,
    pub pages: usize,
    pub total_violations: usize,
    #[serde(flatten)]
    pub counts: ImpactCounts,
    pub unique_violations: usize,
    pub weighted_severity_sum: f64,
    pub avg_violations_per_page: f64,
    pub priority_score: f64,
    pub top_violation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelStepRow {
    pub funnel_name: String,
    pub funnel_step: String,
    pub pages: usize,
    pub total_violations: usize,
    #[serde(flatten)]
    pub counts: ImpactCounts,
    pub unique_violations: usize,
    pub weighted_score: f64,
}

/// The full aggregation bundle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Aggregations {
    pub by_impact: Vec<ImpactRow>,
    pub by_page: Vec<PageRow>,
    pub by_violation: Vec<ViolationRow>,
    pub by_page_type: Vec<PageTypeRow>,
    /// Present only when crawl state contributed more than one template.
    pub by_template: Vec<TemplateRow>,
    /// Present only when funnel data exists.
    pub by_funnel: Vec<FunnelRow>,
    pub by_funnel_step: Vec<FunnelStepRow>,
}

/// Most frequent string in an iterator, ties broken lexicographically.
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
}

fn most_common_impact(rows: &[&CleanViolation]) -> Impact {
    let mut counts: BTreeMap<Impact, usize> = BTreeMap::new();
    for row in rows {
        *counts.entry(row.impact).or_insert(0) += 1;
    }
    counts
        .into_iter()
        // Ties go to the more severe impact (lower Ord value).
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(impact, _)| impact)
        .unwrap_or(Impact::Unknown)
}

fn top_principle(rows: &[&CleanViolation]) -> Principle {
    let mut counts: BTreeMap<Principle, usize> = BTreeMap::new();
    for row in rows {
        *counts.entry(row.wcag_principle).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(principle, _)| principle)
        .unwrap_or(Principle::Other)
}

#[must_use]
pub fn aggregate(clean: &[CleanViolation], weights: &SeverityWeights) -> Aggregations {
    let mut aggregations = Aggregations::default();
    let total_violations = clean.len();
    let unique_pages: BTreeSet<&str> = clean.iter().map(|c| c.normalized_url.as_str()).collect();
    let total_unique_pages = unique_pages.len();

    // --- By Impact ---
    {
        let mut per_impact: BTreeMap<Impact, (usize, BTreeSet<&str>)> = BTreeMap::new();
        for row in clean {
            let entry = per_impact.entry(row.impact).or_default();
            entry.0 += 1;
            entry.1.insert(row.normalized_url.as_str());
        }
        // Severity order, most severe first.
        for impact in Impact::ALL {
            let Some((count, pages)) = per_impact.get(&impact) else {
                continue;
            };
            aggregations.by_impact.push(ImpactRow {
                impact,
                total_violations: *count,
                unique_pages: pages.len(),
                percentage: if total_violations > 0 {
                    round2(*count as f64 / total_violations as f64 * 100.0)
                } else {
                    0.0
                },
                avg_across_all_pages: if total_unique_pages > 0 {
                    round2(*count as f64 / total_unique_pages as f64)
                } else {
                    0.0
                },
            });
        }
    }

    // --- By Page ---
    {
        let mut per_page: BTreeMap<&str, Vec<&CleanViolation>> = BTreeMap::new();
        for row in clean {
            per_page.entry(row.normalized_url.as_str()).or_default().push(row);
        }
        for (url, rows) in &per_page {
            let mut counts = ImpactCounts::default();
            for row in rows {
                counts.add(row.impact);
            }
            aggregations.by_page.push(PageRow {
                normalized_url: (*url).to_string(),
                display_url: rows[0].page_url.clone(),
                page_type: rows[0].page_type,
                template: rows[0].template.clone(),
                total_violations: rows.len(),
                counts,
                priority_score: counts.severity_points(weights),
            });
        }
        aggregations.by_page.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then_with(|| a.normalized_url.cmp(&b.normalized_url))
        });
    }

    // --- By Violation ---
    {
        let mut per_violation: BTreeMap<&str, Vec<&CleanViolation>> = BTreeMap::new();
        for row in clean {
            per_violation.entry(row.violation_id.as_str()).or_default().push(row);
        }
        for (violation_id, rows) in &per_violation {
            let affected: BTreeSet<&str> =
                rows.iter().map(|r| r.normalized_url.as_str()).collect();
            let impact = most_common_impact(rows);
            let occurrences = rows.len();
            let solution = solution_for(violation_id);
            aggregations.by_violation.push(ViolationRow {
                violation_id: (*violation_id).to_string(),
                most_common_impact: impact,
                wcag_principle: rows[0].wcag_principle,
                wcag_criterion: rows[0].wcag_criterion.clone(),
                wcag_name: rows[0].wcag_name.clone(),
                total_occurrences: occurrences,
                affected_pages: affected.len(),
                priority_score: u64::from(weight_of(weights, impact)) * occurrences as u64,
                percentage: if total_violations > 0 {
                    round2(occurrences as f64 / total_violations as f64 * 100.0)
                } else {
                    0.0
                },
                solution_description: solution.description.to_string(),
                technical_solution: solution.technical.to_string(),
                user_impact: solution.user_impact.to_string(),
            });
        }
        aggregations.by_violation.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then_with(|| a.violation_id.cmp(&b.violation_id))
        });
    }

    // --- By Page Type ---
    {
        let mut per_type: BTreeMap<PageType, Vec<&CleanViolation>> = BTreeMap::new();
        for row in clean {
            per_type.entry(row.page_type).or_default().push(row);
        }
        for (page_type, rows) in &per_type {
            let pages: BTreeSet<&str> = rows.iter().map(|r| r.normalized_url.as_str()).collect();
            let mut counts = ImpactCounts::default();
            for row in rows {
                counts.add(row.impact);
            }
            let total_pages = pages.len();
            let priority = if total_pages > 0 {
                counts.severity_points(weights) as f64 / total_pages as f64
            } else {
                0.0
            };
            aggregations.by_page_type.push(PageTypeRow {
                page_type: *page_type,
                total_pages,
                total_violations: rows.len(),
                counts,
                most_common_violation: most_common(rows.iter().map(|r| r.violation_id.as_str()))
                    .unwrap_or_else(|| "None".to_string()),
                avg_violations_per_page: if total_pages > 0 {
                    round2(rows.len() as f64 / total_pages as f64)
                } else {
                    0.0
                },
                priority_score: round2(priority),
                top_wcag_principle: top_principle(rows),
            });
        }
        aggregations.by_page_type.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.page_type.to_string().cmp(&b.page_type.to_string()))
        });
    }

    // --- By Template (only with more than one known template) ---
    {
        let known_templates: BTreeSet<&str> = clean
            .iter()
            .filter_map(|c| c.template.as_deref())
            .collect();
        if known_templates.len() > 1 {
            let mut per_template: BTreeMap<&str, Vec<&CleanViolation>> = BTreeMap::new();
            for row in clean {
                if let Some(template) = row.template.as_deref() {
                    per_template.entry(template).or_default().push(row);
                }
            }
            for (template, rows) in &per_template {
                let pages: BTreeSet<&str> =
                    rows.iter().map(|r| r.normalized_url.as_str()).collect();
                let unique: BTreeSet<&str> =
                    rows.iter().map(|r| r.violation_id.as_str()).collect();
                let mut counts = ImpactCounts::default();
                for row in rows {
                    counts.add(row.impact);
                }
                let total_pages = pages.len();
                aggregations.by_template.push(TemplateRow {
                    template: (*template).to_string(),
                    pages: total_pages,
                    total_violations: rows.len(),
                    counts,
                    unique_violations: unique.len(),
                    top_violation: most_common(rows.iter().map(|r| r.violation_id.as_str()))
                        .unwrap_or_else(|| "None".to_string()),
                    top_wcag_principle: top_principle(rows),
                    avg_violations_per_page: if total_pages > 0 {
                        round2(rows.len() as f64 / total_pages as f64)
                    } else {
                        0.0
                    },
                    priority_score: if total_pages > 0 {
                        round2(counts.severity_points(weights) as f64 / total_pages as f64)
                    } else {
                        0.0
                    },
                });
            }
            aggregations.by_template.sort_by(|a, b| {
                b.priority_score
                    .partial_cmp(&a.priority_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.template.cmp(&b.template))
            });
        }
    }

    // --- By Funnel / By Funnel Step ---
    {
        let funnel_rows: Vec<&CleanViolation> =
            clean.iter().filter(|c| c.is_in_funnel()).collect();
        if !funnel_rows.is_empty() {
            let mut per_funnel: BTreeMap<&str, Vec<&CleanViolation>> = BTreeMap::new();
            for row in &funnel_rows {
                if let Some(name) = row.funnel_name.as_deref() {
                    per_funnel.entry(name).or_default().push(row);
                }
            }
            for (funnel, rows) in &per_funnel {
                let pages: BTreeSet<&str> =
                    rows.iter().map(|r| r.normalized_url.as_str()).collect();
                let unique: BTreeSet<&str> =
                    rows.iter().map(|r| r.violation_id.as_str()).collect();
                let mut counts = ImpactCounts::default();
                let mut weighted_sum = 0.0;
                for row in rows {
                    counts.add(row.impact);
                    weighted_sum += row.funnel_severity_score;
                }
                let total_pages = pages.len();
                aggregations.by_funnel.push(FunnelRow {
                    funnel_name: (*funnel).to_string(),
                    pages: total_pages,
                    total_violations: rows.len(),
                    counts,
                    unique_violations: unique.len(),
                    weighted_severity_sum: round2(weighted_sum),
                    avg_violations_per_page: if total_pages > 0 {
                        round2(rows.len() as f64 / total_pages as f64)
                    } else {
                        0.0
                    },
                    priority_score: if total_pages > 0 {
                        round2(weighted_sum / total_pages as f64)
                    } else {
                        0.0
                    },
                    top_violation: most_common(rows.iter().map(|r| r.violation_id.as_str()))
                        .unwrap_or_else(|| "None".to_string()),
                });
            }
            aggregations.by_funnel.sort_by(|a, b| {
                b.priority_score
                    .partial_cmp(&a.priority_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.funnel_name.cmp(&b.funnel_name))
            });

            let mut per_step: BTreeMap<(&str, &str), Vec<&CleanViolation>> = BTreeMap::new();
            for row in &funnel_rows {
                if let Some(name) = row.funnel_name.as_deref() {
                    let step = row.funnel_step.as_deref().unwrap_or("none");
                    per_step.entry((name, step)).or_default().push(row);
                }
            }
            for ((funnel, step), rows) in &per_step {
                let pages: BTreeSet<&str> =
                    rows.iter().map(|r| r.normalized_url.as_str()).collect();
                let unique: BTreeSet<&str> =
                    rows.iter().map(|r| r.violation_id.as_str()).collect();
                let mut counts = ImpactCounts::default();
                let mut weighted_sum = 0.0;
                for row in rows {
                    counts.add(row.impact);
                    weighted_sum += row.funnel_severity_score;
                }
                let step_pages = pages.len();
                aggregations.by_funnel_step.push(FunnelStepRow {
                    funnel_name: (*funnel).to_string(),
                    funnel_step: (*step).to_string(),
                    pages: step_pages,
                    total_violations: rows.len(),
                    counts,
                    unique_violations: unique.len(),
                    weighted_score: if step_pages > 0 {
                        round2(weighted_sum / step_pages as f64)
                    } else {
                        0.0
                    },
                });
            }
            // Key order is already deterministic from the BTreeMap.
        }
    }

    aggregations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urlnorm::UrlNormalizer;
    use crate::analyzer::clean::Cleaner;
    use crate::scanner::Violation;

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

    fn cleaned(rows: Vec<Violation>) -> Vec<CleanViolation> {
        let normalizer = UrlNormalizer::new(false);
        Cleaner::new(SeverityWeights::default(), &normalizer, Default::default())
            .clean(&rows, None)
    }

    fn sample() -> Vec<CleanViolation> {
        cleaned(vec![
            raw("https://e.test/", "image-alt", Impact::Critical, "<img a>"),
            raw("https://e.test/", "image-alt", Impact::Critical, "<img b>"),
            raw("https://e.test/", "color-contrast", Impact::Serious, "<a>"),
            raw("https://e.test/products/1", "color-contrast", Impact::Serious, "<p>"),
            raw("https://e.test/products/1", "label", Impact::Minor, "<input>"),
        ])
    }

    #[test]
    fn by_impact_counts_and_percentages() {
        let aggs = aggregate(&sample(), &SeverityWeights::default());
        assert_eq!(aggs.by_impact.len(), 3);
        let critical = &aggs.by_impact[0];
        assert_eq!(critical.impact, Impact::Critical);
        assert_eq!(critical.total_violations, 2);
        assert_eq!(critical.unique_pages, 1);
        assert!((critical.percentage - 40.0).abs() < 1e-9);
        assert!((critical.avg_across_all_pages - 1.0).abs() < 1e-9);
    }

    #[test]
    fn by_page_priority_ordering() {
        let aggs = aggregate(&sample(), &SeverityWeights::default());
        assert_eq!(aggs.by_page.len(), 2);
        // Homepage: 2*4 + 3 = 11; product page: 3 + 1 = 4.
        assert_eq!(aggs.by_page[0].normalized_url, "https://e.test/");
        assert_eq!(aggs.by_page[0].priority_score, 11);
        assert_eq!(aggs.by_page[1].priority_score, 4);
    }

    #[test]
    fn by_violation_carries_wcag_and_solutions() {
        let aggs = aggregate(&sample(), &SeverityWeights::default());
        let contrast = aggs
            .by_violation
            .iter()
            .find(|v| v.violation_id == "color-contrast")
            .unwrap();
        assert_eq!(contrast.total_occurrences, 2);
        assert_eq!(contrast.affected_pages, 2);
        assert_eq!(contrast.most_common_impact, Impact::Serious);
        assert_eq!(contrast.priority_score, 6);
        assert_eq!(contrast.wcag_criterion, "1.4.3");
        assert!(contrast.technical_solution.contains("4.5:1"));
    }

    #[test]
    fn by_page_type_splits_homepage_and_product() {
        let aggs = aggregate(&sample(), &SeverityWeights::default());
        let types: Vec<_> = aggs.by_page_type.iter().map(|r| r.page_type).collect();
        assert!(types.contains(&PageType::Homepage));
        assert!(types.contains(&PageType::Product));
        let homepage = aggs
            .by_page_type
            .iter()
            .find(|r| r.page_type == PageType::Homepage)
            .unwrap();
        assert_eq!(homepage.total_pages, 1);
        assert_eq!(homepage.total_violations, 3);
        assert!((homepage.priority_score - 11.0).abs() < 1e-9);
    }

    #[test]
    fn funnel_tables_absent_without_funnel_rows() {
        let aggs = aggregate(&sample(), &SeverityWeights::default());
        assert!(aggs.by_funnel.is_empty());
        assert!(aggs.by_funnel_step.is_empty());
    }

    #[test]
    fn funnel_tables_weight_by_multiplier() {
        let clean = cleaned(vec![
            raw("https://e.test/cart", "label", Impact::Moderate, "<input>"),
            raw("https://e.test/checkout", "label", Impact::Minor, "<input>"),
        ]);
        let aggs = aggregate(&clean, &SeverityWeights::default());
        assert_eq!(aggs.by_funnel.len(), 1);
        let funnel = &aggs.by_funnel[0];
        assert_eq!(funnel.funnel_name, "checkout");
        // (2 * 2.0) + (1 * 2.0) = 6 weighted points over 2 pages.
        assert!((funnel.weighted_severity_sum - 6.0).abs() < 1e-9);
        assert!((funnel.priority_score - 3.0).abs() < 1e-9);
        assert_eq!(aggs.by_funnel_step.len(), 2);
    }

    #[test]
    fn empty_input_produces_empty_tables() {
        let aggs = aggregate(&[], &SeverityWeights::default());
        assert!(aggs.by_impact.is_empty());
        assert!(aggs.by_page.is_empty());
        assert!(aggs.by_violation.is_empty());
    }

    #[test]
    fn aggregation_is_deterministic() {
        let a = aggregate(&sample(), &SeverityWeights::default());
        let b = aggregate(&sample(), &SeverityWeights::default());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
