//! axe-core sourcing and result decoding.
//!
//! The rule engine itself never runs in-process: the minified axe script is
//! injected into the page and executed there. The script comes from a
//! configured local path when one is set, otherwise from a pinned CDN
//! build, downloaded once per run and cached under the domain's temp
//! directory.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::output::{Component, OutputLayout};

/// Pinned axe-core build. Upgrades are deliberate: rule sets change
/// between versions and reports are compared across runs.
pub const AXE_CDN_URL: &str = "https://cdn.jsdelivr.net/npm/axe-core@4.10.2/axe.min.js";

const AXE_CACHE_FILENAME: &str = "axe.min.js";

/// Resolve the axe-core source text.
pub async fn resolve_axe_source(
    configured_path: Option<&Path>,
    layout: &OutputLayout,
) -> Result<String> {
    if let Some(path) = configured_path {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading axe script {}", path.display()))?;
        info!("using local axe-core script {}", path.display());
        return Ok(source);
    }

    let cache_path = layout.path(Component::Temp, AXE_CACHE_FILENAME);
    if cache_path.exists() {
        if let Ok(cached) = tokio::fs::read_to_string(&cache_path).await {
            if !cached.trim().is_empty() {
                debug!("using cached axe-core from {}", cache_path.display());
                return Ok(cached);
            }
        }
    }

    info!("downloading axe-core from {AXE_CDN_URL}");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("building axe download client")?;
    let source = client
        .get(AXE_CDN_URL)
        .send()
        .await
        .context("downloading axe-core")?
        .error_for_status()
        .context("axe-core download returned an error status")?
        .text()
        .await
        .context("reading axe-core body")?;

    layout
        .atomic_write(&cache_path, source.as_bytes())
        .context("caching axe-core script")?;
    Ok(source)
}

/// In-page runner: resolves with the stringified result object so the
/// decoded payload is plain JSON regardless of CDP serialization quirks.
pub const AXE_RUN_SCRIPT: &str = r"
    axe.run(document, { resultTypes: ['violations'] })
        .then(results => JSON.stringify(results))
";

/// Probe for a prior successful injection.
pub const AXE_PRESENT_SCRIPT: &str = "typeof axe !== 'undefined' && typeof axe.run === 'function'";

/// Deserialized subset of an axe result object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AxeResults {
    #[serde(default)]
    pub violations: Vec<AxeViolation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AxeViolation {
    pub id: String,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub nodes: Vec<AxeNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AxeNode {
    /// Selector chain; entries are strings, or arrays of strings when the
    /// node sits inside an iframe or shadow root.
    #[serde(default)]
    pub target: Vec<serde_json::Value>,
    #[serde(default)]
    pub html: String,
    #[serde(default, rename = "failureSummary")]
    pub failure_summary: Option<String>,
}

impl AxeNode {
    /// Flatten the selector chain into one comma-joined string.
    #[must_use]
    pub fn target_selector(&self) -> String {
        self.target
            .iter()
            .map(|entry| match entry {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Array(parts) => parts
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl AxeResults {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("decoding axe results")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_axe_payload() {
        let raw = r##"{
            "violations": [{
                "id": "color-contrast",
                "impact": "serious",
                "description": "Elements must have sufficient color contrast",
                "help": "Elements must meet minimum color contrast ratio thresholds",
                "nodes": [
                    {"target": ["#nav > a"], "html": "<a href=\"/x\">x</a>",
                     "failureSummary": "Fix any of the following: ..."},
                    {"target": [["iframe#main", "button.buy"]], "html": "<button>buy</button>"}
                ]
            }]
        }"##;
        let results = AxeResults::from_json(raw).unwrap();
        assert_eq!(results.violations.len(), 1);
        let v = &results.violations[0];
        assert_eq!(v.id, "color-contrast");
        assert_eq!(v.nodes[0].target_selector(), "#nav > a");
        assert_eq!(v.nodes[1].target_selector(), "iframe#main, button.buy");
        assert!(v.nodes[1].failure_summary.is_none());
    }

    #[test]
    fn tolerates_missing_fields() {
        let results = AxeResults::from_json(r#"{"violations": [{"id": "x"}]}"#).unwrap();
        assert_eq!(results.violations[0].nodes.len(), 0);
        assert!(results.violations[0].impact.is_none());

        let empty = AxeResults::from_json("{}").unwrap();
        assert!(empty.violations.is_empty());
    }

    #[tokio::test]
    async fn local_script_path_wins_over_cache_and_cdn() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();
        let script = root.path().join("axe.js");
        tokio::fs::write(&script, "// local axe build").await.unwrap();

        let source = resolve_axe_source(Some(script.as_path()), &layout)
            .await
            .unwrap();
        assert_eq!(source, "// local axe build");
    }

    #[tokio::test]
    async fn cached_copy_is_reused() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();
        let cache = layout.path(Component::Temp, AXE_CACHE_FILENAME);
        layout.atomic_write(&cache, b"// cached axe").unwrap();

        let source = resolve_axe_source(None, &layout).await.unwrap();
        assert_eq!(source, "// cached axe");
    }
}
