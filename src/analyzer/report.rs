//! Report assembly: summary metrics, tables, chart descriptors and the
//! workbook layout.
//!
//! Sheet set: `Executive Summary`, `Detailed Analysis`, `Template
//! Projection` (when crawl state contributed), `Funnel Analysis` (when
//! funnel data exists), `Recommendations`, `Charts`, `Raw Data`.

use serde::Serialize;

use crate::funnel::FunnelArtifacts;
use crate::report_io::{ChartDescriptor, ChartKind, Workbook};
use crate::scanner::Impact;

use super::aggregate::Aggregations;
use super::clean::CleanViolation;
use super::conformance::Conformance;
use super::projection::TemplateProjectionRow;

/// One key/value line on the Executive Summary sheet.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRow {
    pub metric: String,
    pub value: serde_json::Value,
}

/// Funnel execution outcome lines for the Funnel Analysis sheet.
#[derive(Debug, Clone, Serialize)]
pub struct FunnelExecutionRow {
    pub funnel_id: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub completion_rate: f64,
}

/// The analyzer's final product.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub domain: String,
    pub summary: Vec<MetricRow>,
    pub conformance: Conformance,
    pub aggregations: Aggregations,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub template_projection: Vec<TemplateProjectionRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub funnel_executions: Vec<FunnelExecutionRow>,
    pub charts: Vec<ChartDescriptor>,
    /// Cleaned rows, verbatim, for the Raw Data sheet.
    pub raw: Vec<CleanViolation>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Report {
    /// Assemble a report from the analysis pieces.
    #[must_use]
    pub fn assemble(
        domain: &str,
        clean: Vec<CleanViolation>,
        aggregations: Aggregations,
        conformance: Conformance,
        template_projection: Vec<TemplateProjectionRow>,
        funnel_runs: &[FunnelArtifacts],
    ) -> Self {
        let total_violations = clean.len();
        let unique_pages = conformance.unique_pages;

        let mut summary = vec![
            MetricRow {
                metric: "Total Violations".to_string(),
                value: total_violations.into(),
            },
            MetricRow {
                metric: "Unique Pages".to_string(),
                value: unique_pages.into(),
            },
            MetricRow {
                metric: "Average Violations per Page".to_string(),
                value: if unique_pages > 0 {
                    round2(total_violations as f64 / unique_pages as f64).into()
                } else {
                    0.0.into()
                },
            },
        ];
        for impact in Impact::ALL {
            let count = clean.iter().filter(|c| c.impact == impact).count();
            summary.push(MetricRow {
                metric: format!("{} Violations", capitalize(impact.as_str())),
                value: count.into(),
            });
        }
        summary.push(MetricRow {
            metric: "Weighted Severity Score".to_string(),
            value: conformance.weighted_violation_score.into(),
        });
        summary.push(MetricRow {
            metric: "WCAG Conformance Score".to_string(),
            value: conformance.score.into(),
        });
        summary.push(MetricRow {
            metric: "WCAG Conformance Level".to_string(),
            value: conformance.level.clone().into(),
        });
        if conformance.custom_weights {
            summary.push(MetricRow {
                metric: "Custom Scoring Weights".to_string(),
                value: true.into(),
            });
        }

        let funnel_executions: Vec<FunnelExecutionRow> = funnel_runs
            .iter()
            .map(|run| FunnelExecutionRow {
                funnel_id: run.funnel_id.clone(),
                steps_completed: run.steps_completed,
                total_steps: run.total_steps,
                completion_rate: if run.total_steps > 0 {
                    round2(run.steps_completed as f64 / run.total_steps as f64 * 100.0)
                } else {
                    0.0
                },
            })
            .collect();

        let charts = build_charts(&clean, &aggregations);

        Self {
            domain: domain.to_string(),
            summary,
            conformance,
            aggregations,
            template_projection,
            funnel_executions,
            charts,
            raw: clean,
        }
    }

    /// Lay the report out as workbook sheets.
    pub fn to_workbook(&self) -> anyhow::Result<Workbook> {
        let mut workbook = Workbook::default();
        workbook.push("Executive Summary", &self.summary)?;

        // Detailed Analysis folds the main aggregation tables into one
        // sheet of typed sections.
        let mut detailed: Vec<serde_json::Value> = Vec::new();
        for row in &self.aggregations.by_impact {
            detailed.push(section_row("By Impact", row)?);
        }
        for row in &self.aggregations.by_page {
            detailed.push(section_row("By Page", row)?);
        }
        for row in &self.aggregations.by_violation {
            detailed.push(section_row("By Violation", row)?);
        }
        for row in &self.aggregations.by_page_type {
            detailed.push(section_row("By Page Type", row)?);
        }
        for row in &self.aggregations.by_template {
            detailed.push(section_row("By Template", row)?);
        }
        workbook.push("Detailed Analysis", &detailed)?;

        if !self.template_projection.is_empty() {
            workbook.push("Template Projection", &self.template_projection)?;
        }

        if !self.funnel_executions.is_empty() || !self.aggregations.by_funnel.is_empty() {
            let mut funnel_rows: Vec<serde_json::Value> = Vec::new();
            for row in &self.funnel_executions {
                funnel_rows.push(section_row("Execution", row)?);
            }
            for row in &self.aggregations.by_funnel {
                funnel_rows.push(section_row("By Funnel", row)?);
            }
            for row in &self.aggregations.by_funnel_step {
                funnel_rows.push(section_row("By Funnel Step", row)?);
            }
            workbook.push("Funnel Analysis", &funnel_rows)?;
        }

        // Recommendations: the top violations by priority with their
        // remediation columns.
        let recommendations: Vec<serde_json::Value> = self
            .aggregations
            .by_violation
            .iter()
            .take(20)
            .map(|row| {
                serde_json::json!({
                    "violation_id": row.violation_id,
                    "priority_score": row.priority_score,
                    "wcag_criterion": row.wcag_criterion,
                    "description": row.solution_description,
                    "technical_solution": row.technical_solution,
                    "user_impact": row.user_impact,
                })
            })
            .collect();
        workbook.push("Recommendations", &recommendations)?;

        workbook.push("Charts", &self.charts)?;
        workbook.push("Raw Data", &self.raw)?;
        Ok(workbook)
    }
}

fn section_row<T: Serialize>(section: &str, row: &T) -> anyhow::Result<serde_json::Value> {
    let mut value = serde_json::to_value(row)?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "section".to_string(),
            serde_json::Value::String(section.to_string()),
        );
    }
    Ok(value)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Chart descriptors; rendering is delegated to the `ChartRenderer`
/// capability.
fn build_charts(clean: &[CleanViolation], aggregations: &Aggregations) -> Vec<ChartDescriptor> {
    let mut charts = Vec::new();

    let impact_series: Vec<(String, f64)> = aggregations
        .by_impact
        .iter()
        .map(|row| (row.impact.to_string(), row.total_violations as f64))
        .collect();
    if !impact_series.is_empty() {
        charts.push(ChartDescriptor {
            id: "impact_distribution".to_string(),
            title: "Violations by impact".to_string(),
            kind: ChartKind::Pie,
            series: impact_series,
        });
    }

    let top_violations: Vec<(String, f64)> = aggregations
        .by_violation
        .iter()
        .take(10)
        .map(|row| (row.violation_id.clone(), row.total_occurrences as f64))
        .collect();
    if !top_violations.is_empty() {
        charts.push(ChartDescriptor {
            id: "top_violations".to_string(),
            title: "Most frequent violations".to_string(),
            kind: ChartKind::HorizontalBar,
            series: top_violations,
        });
    }

    let page_type_series: Vec<(String, f64)> = aggregations
        .by_page_type
        .iter()
        .map(|row| (row.page_type.to_string(), row.priority_score))
        .collect();
    if !page_type_series.is_empty() {
        charts.push(ChartDescriptor {
            id: "page_type_priority".to_string(),
            title: "Priority score by page type".to_string(),
            kind: ChartKind::Bar,
            series: page_type_series,
        });
    }

    let mut principle_counts: std::collections::BTreeMap<String, f64> =
        std::collections::BTreeMap::new();
    for row in clean {
        *principle_counts
            .entry(row.wcag_principle.to_string())
            .or_insert(0.0) += 1.0;
    }
    if !principle_counts.is_empty() {
        charts.push(ChartDescriptor {
            id: "wcag_principles".to_string(),
            title: "Violations by WCAG principle".to_string(),
            kind: ChartKind::Bar,
            series: principle_counts.into_iter().collect(),
        });
    }

    if !aggregations.by_funnel.is_empty() {
        charts.push(ChartDescriptor {
            id: "funnel_priority".to_string(),
            title: "Weighted priority by funnel".to_string(),
            kind: ChartKind::Bar,
            series: aggregations
                .by_funnel
                .iter()
                .map(|row| (row.funnel_name.clone(), row.priority_score))
                .collect(),
        });
    }

    charts
}
