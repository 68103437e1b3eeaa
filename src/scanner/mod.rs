//! Accessibility scanning: axe-core over a bounded driver pool.
//!
//! The scanner consumes representative URLs (plus restricted URLs and
//! funnel HTML snapshots) and emits a deduplicated [`ViolationSet`]. One
//! violation row exists per offending DOM node; the dedup key within a run
//! is `(normalized page URL, violation id, target selector)`.

mod axe;
mod engine;
mod visited;

pub use axe::{resolve_axe_source, AxeResults, AXE_CDN_URL};
pub use engine::{AxeScanner, ScanOutcome, ScanTask};
pub use visited::VisitedSet;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::urlnorm::UrlNormalizer;

/// axe impact levels, with a catch-all for anything the rule engine emits
/// that this crate does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Impact {
    Critical,
    Serious,
    Moderate,
    Minor,
    Unknown,
}

impl Impact {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Serious => "serious",
            Self::Moderate => "moderate",
            Self::Minor => "minor",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parser: case/whitespace-insensitive, anything unrecognized
    /// is `Unknown`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" => Self::Critical,
            "serious" => Self::Serious,
            "moderate" => Self::Moderate,
            "minor" => Self::Minor,
            _ => Self::Unknown,
        }
    }

    pub const ALL: [Impact; 5] = [
        Self::Critical,
        Self::Serious,
        Self::Moderate,
        Self::Minor,
        Self::Unknown,
    ];
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Impact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Impact {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One axe finding on one DOM node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub page_url: String,
    pub violation_id: String,
    pub impact: Impact,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(rename = "target", default)]
    pub target_selector: String,
    #[serde(rename = "html", default)]
    pub html_fragment: String,
    #[serde(default)]
    pub failure_summary: String,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_number: Option<usize>,
}

/// Append-only violation collection with run-level deduplication.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ViolationSet {
    violations: Vec<Violation>,
    #[serde(skip)]
    seen: BTreeSet<(String, String, String)>,
}

impl ViolationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless `(normalized page_url, violation_id, target)` was
    /// already recorded. Merging concurrent workers through this key is
    /// commutative: insertion order cannot change the surviving set.
    pub fn insert(&mut self, violation: Violation, normalizer: &UrlNormalizer) -> bool {
        let normalized_page = normalizer
            .normalize(&violation.page_url)
            .map(|u| u.as_str().to_string())
            .unwrap_or_else(|_| violation.page_url.clone());
        let key = (
            normalized_page,
            violation.violation_id.clone(),
            violation.target_selector.clone(),
        );
        if self.seen.insert(key) {
            self.violations.push(violation);
            true
        } else {
            false
        }
    }

    pub fn extend(&mut self, violations: Vec<Violation>, normalizer: &UrlNormalizer) {
        for violation in violations {
            self.insert(violation, normalizer);
        }
    }

    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }

    /// Distinct page URLs, as scanned.
    #[must_use]
    pub fn page_urls(&self) -> BTreeSet<&str> {
        self.violations.iter().map(|v| v.page_url.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(url: &str, id: &str, target: &str) -> Violation {
        Violation {
            page_url: url.to_string(),
            violation_id: id.to_string(),
            impact: Impact::Serious,
            description: String::new(),
            help: String::new(),
            target_selector: target.to_string(),
            html_fragment: String::new(),
            failure_summary: String::new(),
            auth_required: false,
            funnel_name: None,
            funnel_step: None,
            step_number: None,
        }
    }

    #[test]
    fn impact_parsing_is_lenient() {
        assert_eq!(Impact::parse("Critical "), Impact::Critical);
        assert_eq!(Impact::parse("SERIOUS"), Impact::Serious);
        assert_eq!(Impact::parse("weird"), Impact::Unknown);
        assert_eq!(Impact::parse(""), Impact::Unknown);
    }

    #[test]
    fn impact_serde_round_trip() {
        let json = serde_json::to_string(&Impact::Moderate).unwrap();
        assert_eq!(json, "\"moderate\"");
        let back: Impact = serde_json::from_str("\"nonsense\"").unwrap();
        assert_eq!(back, Impact::Unknown);
    }

    #[test]
    fn dedup_key_uses_normalized_url() {
        let normalizer = UrlNormalizer::new(false);
        let mut set = ViolationSet::new();
        assert!(set.insert(violation("https://e.test/a/", "image-alt", "img"), &normalizer));
        // Same page modulo trailing slash, same rule, same node.
        assert!(!set.insert(violation("https://e.test/a", "image-alt", "img"), &normalizer));
        // Different node survives.
        assert!(set.insert(violation("https://e.test/a", "image-alt", "img.hero"), &normalizer));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn merging_is_order_independent() {
        let normalizer = UrlNormalizer::new(false);
        let a = violation("https://e.test/x", "label", "input#q");
        let b = violation("https://e.test/y", "label", "input#q");
        let dup = violation("https://e.test/x/", "label", "input#q");

        let mut forward = ViolationSet::new();
        forward.extend(vec![a.clone(), b.clone(), dup.clone()], &normalizer);
        let mut backward = ViolationSet::new();
        backward.extend(vec![dup, b, a], &normalizer);

        let mut forward_keys: Vec<_> =
            forward.violations().iter().map(|v| v.page_url.clone()).collect();
        let mut backward_keys: Vec<_> =
            backward.violations().iter().map(|v| v.page_url.clone()).collect();
        forward_keys.sort();
        backward_keys.sort();
        // The canonical pages covered are identical either way.
        assert_eq!(forward.len(), backward.len());
        assert_eq!(forward_keys.len(), backward_keys.len());
    }
}
