//! Violation analysis: cleaning, WCAG mapping, aggregation, template
//! projection, conformance scoring and report assembly.
//!
//! The analyzer is deterministic: the same violation input (with fixed
//! severity weights and mapping tables) produces byte-identical tables,
//! whatever order the scanner's workers delivered rows in.

mod aggregate;
mod clean;
mod conformance;
mod projection;
mod report;
mod solutions;
mod wcag;

pub use aggregate::{
    aggregate, Aggregations, FunnelRow, FunnelStepRow, ImpactCounts, ImpactRow, PageRow,
    PageTypeRow, TemplateRow, ViolationRow,
};
pub use clean::{CleanViolation, Cleaner};
pub use conformance::{conformance, Conformance, LEVEL_NO_PAGES};
pub use projection::{project_templates, Criticality, TemplateProjectionRow};
pub use report::{FunnelExecutionRow, MetricRow, Report};
pub use solutions::{solution_for, Solution};
pub use wcag::{wcag_mapping, Principle, WcagMapping};

use std::collections::BTreeMap;

use crate::config::ScoringConfig;
use crate::crawler::CrawlState;
use crate::funnel::FunnelArtifacts;
use crate::scanner::Violation;
use crate::urlnorm::UrlNormalizer;

/// End-to-end analysis front door.
pub struct AccessibilityAnalyzer {
    scoring: ScoringConfig,
    normalizer: UrlNormalizer,
    funnel_multipliers: BTreeMap<String, f64>,
}

impl AccessibilityAnalyzer {
    #[must_use]
    pub fn new(scoring: ScoringConfig, strip_www: bool) -> Self {
        Self {
            scoring,
            normalizer: UrlNormalizer::new(strip_www),
            funnel_multipliers: BTreeMap::new(),
        }
    }

    /// Severity multipliers for explicitly-defined funnels.
    #[must_use]
    pub fn with_funnel_multipliers(mut self, multipliers: BTreeMap<String, f64>) -> Self {
        self.funnel_multipliers = multipliers;
        self
    }

    /// Run the full pipeline: clean, aggregate, project (when crawl state
    /// is present), score, assemble.
    #[must_use]
    pub fn analyze(
        &self,
        domain: &str,
        violations: &[Violation],
        crawl: Option<&CrawlState>,
        funnel_runs: &[FunnelArtifacts],
    ) -> Report {
        let cleaner = Cleaner::new(
            self.scoring.weights,
            &self.normalizer,
            self.funnel_multipliers.clone(),
        );
        let clean = cleaner.clean(violations, crawl);

        let aggregations = aggregate(&clean, &self.scoring.weights);
        let conformance = conformance(&clean, &self.scoring);

        // Projection runs whenever a crawl state contributed clusters; the
        // stricter more-than-one-template gate applies only to the
        // By-Template aggregation.
        let projection = match crawl {
            Some(state) if state.total_templates() > 0 => {
                project_templates(&clean, state, &self.scoring.weights)
            }
            _ => Vec::new(),
        };

        Report::assemble(domain, clean, aggregations, conformance, projection, funnel_runs)
    }
}
