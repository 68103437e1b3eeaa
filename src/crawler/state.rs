//! Crawl state: the durable contract between the crawler and later stages.
//!
//! Persisted as JSON under `<slug>/crawler_output/crawler_state_<slug>.json`.
//! Per-domain payloads carry exactly `{structures, visited, url_tree,
//! stats}`; multi-domain files wrap them in a `domain_data` envelope. The
//! loader accepts both shapes so single-domain files from older runs keep
//! working.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AuditError, AuditResult};
use crate::output::OutputLayout;
use crate::template::{TemplateCluster, TemplateId};
use crate::urlnorm::NormalizedUrl;

/// Counters kept per domain. Serialized as a flat map so new counters can
/// appear without breaking old readers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomainStats {
    #[serde(default)]
    pub pages: u64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub client_errors: u64,
    #[serde(default)]
    pub server_errors: u64,
    #[serde(default)]
    pub connection_errors: u64,
    #[serde(default)]
    pub retries: u64,
    /// Incremented once when the domain switches from heavy to light mode.
    #[serde(default, rename = "hybrid/switch_to_http")]
    pub hybrid_switch_to_http: u64,
    /// Pages that needed a heavy re-fetch after a thin light response.
    #[serde(default, rename = "hybrid/heavy_fallbacks")]
    pub hybrid_heavy_fallbacks: u64,
}

/// Everything the crawler learned about one domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainState {
    /// Template clusters keyed by fingerprint. The wire name `structures`
    /// is part of the durable contract.
    #[serde(rename = "structures", default)]
    pub templates: BTreeMap<TemplateId, TemplateCluster>,
    #[serde(default)]
    pub visited: BTreeSet<NormalizedUrl>,
    /// Referrer -> children edges, canonical strings on both sides.
    #[serde(default)]
    pub url_tree: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub stats: DomainStats,
}

impl DomainState {
    /// Record a processed page: visited set, template cluster, link edge.
    pub fn record_page(
        &mut self,
        url: &NormalizedUrl,
        template_id: TemplateId,
        url_template: Option<String>,
        referrer: Option<&NormalizedUrl>,
    ) {
        self.visited.insert(url.clone());
        self.stats.pages += 1;

        match self.templates.get_mut(&template_id) {
            Some(cluster) => cluster.insert(url.clone()),
            None => {
                let mut cluster = TemplateCluster::new(template_id.clone(), url.clone());
                cluster.url_template = url_template;
                self.templates.insert(template_id, cluster);
            }
        }

        if let Some(referrer) = referrer {
            self.url_tree
                .entry(referrer.as_str().to_string())
                .or_default()
                .insert(url.as_str().to_string());
        }
    }

    /// Representative URLs, largest clusters first, optionally capped.
    #[must_use]
    pub fn representative_urls(&self, cap: Option<usize>) -> Vec<NormalizedUrl> {
        let mut clusters: Vec<&TemplateCluster> = self.templates.values().collect();
        clusters.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.template_id.cmp(&b.template_id))
        });
        let take = cap.unwrap_or(clusters.len());
        let mut seen = BTreeSet::new();
        clusters
            .into_iter()
            .take(take)
            .filter_map(|c| {
                // A URL can represent several templates; scan it once.
                seen.insert(c.representative_url.clone())
                    .then(|| c.representative_url.clone())
            })
            .collect()
    }
}

/// Multi-domain crawl state, the crawler's sole output artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    pub domain_data: BTreeMap<String, DomainState>,
}

impl CrawlState {
    #[must_use]
    pub fn domain(&self, domain: &str) -> Option<&DomainState> {
        self.domain_data.get(domain)
    }

    pub fn domain_mut(&mut self, domain: &str) -> &mut DomainState {
        self.domain_data.entry(domain.to_string()).or_default()
    }

    #[must_use]
    pub fn total_visited(&self) -> usize {
        self.domain_data.values().map(|d| d.visited.len()).sum()
    }

    /// Number of distinct templates across all domains.
    #[must_use]
    pub fn total_templates(&self) -> usize {
        self.domain_data.values().map(|d| d.templates.len()).sum()
    }

    /// Persist atomically through the output layout.
    pub fn save(&self, layout: &OutputLayout) -> AuditResult<()> {
        let path = layout.crawler_state_path();
        layout
            .atomic_write_json(&path, self)
            .map_err(|e| AuditError::Fatal(format!("writing crawl state: {e:#}")))?;
        info!(
            "crawl state checkpointed to {} ({} URLs, {} templates)",
            path.display(),
            self.total_visited(),
            self.total_templates()
        );
        Ok(())
    }

    /// Load a state file, accepting the `domain_data` envelope or a bare
    /// single-domain payload. An unreadable file is state corruption:
    /// logged, then treated as "no prior state" by callers.
    pub fn load(path: &Path) -> AuditResult<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| {
            AuditError::StateCorruption(format!("reading {}: {e}", path.display()))
        })?;

        if let Ok(state) = serde_json::from_str::<CrawlState>(&body) {
            if !state.domain_data.is_empty() {
                return Ok(state);
            }
        }

        // Bare single-domain payload: wrap it, keying by the host of the
        // first visited URL when one exists.
        match serde_json::from_str::<DomainState>(&body) {
            Ok(domain_state) => {
                let key = domain_state
                    .visited
                    .iter()
                    .next()
                    .and_then(|u| u.host().map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                let mut state = CrawlState::default();
                state.domain_data.insert(key, domain_state);
                Ok(state)
            }
            Err(e) => {
                warn!("crawl state {} is unreadable: {e}", path.display());
                Err(AuditError::StateCorruption(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        }
    }

    /// Load when present and readable; otherwise an empty state.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(state) => {
                info!(
                    "resuming from crawl state {} ({} URLs visited)",
                    path.display(),
                    state.total_visited()
                );
                state
            }
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::template_fingerprint;

    fn url(raw: &str) -> NormalizedUrl {
        NormalizedUrl::parse(raw, false).unwrap()
    }

    fn tid(n: usize) -> TemplateId {
        template_fingerprint("e.test", &format!("<html><body>{}</body></html>", "<h1>x</h1>".repeat(n)))
    }

    #[test]
    fn record_page_maintains_cluster_invariants() {
        let mut domain = DomainState::default();
        let id = tid(1);
        domain.record_page(&url("https://e.test/products/alpha"), id.clone(), None, None);
        domain.record_page(
            &url("https://e.test/p"),
            id.clone(),
            None,
            Some(&url("https://e.test/products/alpha")),
        );

        let cluster = domain.templates.get(&id).unwrap();
        assert_eq!(cluster.count, 2);
        assert_eq!(cluster.representative_url.as_str(), "https://e.test/p");
        assert!(cluster.is_consistent());
        assert_eq!(domain.visited.len(), 2);
        assert_eq!(
            domain.url_tree["https://e.test/products/alpha"]
                .iter()
                .next()
                .map(String::as_str),
            Some("https://e.test/p")
        );
    }

    #[test]
    fn representative_urls_are_ordered_by_cluster_size() {
        let mut domain = DomainState::default();
        let big = tid(1);
        let small = tid(2);
        for i in 0..5 {
            domain.record_page(&url(&format!("https://e.test/big/{i}")), big.clone(), None, None);
        }
        domain.record_page(&url("https://e.test/small"), small.clone(), None, None);

        let reps = domain.representative_urls(None);
        assert_eq!(reps.len(), 2);
        assert!(reps[0].as_str().starts_with("https://e.test/big/"));

        let capped = domain.representative_urls(Some(1));
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn state_round_trips_through_disk() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(root.path(), "e.test").unwrap();

        let mut state = CrawlState::default();
        state.domain_mut("e.test").record_page(
            &url("https://e.test/"),
            tid(1),
            Some("e.test:/".to_string()),
            None,
        );
        state.domain_mut("e.test").stats.hybrid_switch_to_http = 1;
        state.save(&layout).unwrap();

        let loaded = CrawlState::load(&layout.crawler_state_path()).unwrap();
        assert_eq!(loaded.total_visited(), 1);
        assert_eq!(
            loaded.domain("e.test").unwrap().stats.hybrid_switch_to_http,
            1
        );
    }

    #[test]
    fn wire_format_uses_contract_keys() {
        let mut state = CrawlState::default();
        state
            .domain_mut("e.test")
            .record_page(&url("https://e.test/"), tid(1), None, None);
        let json = serde_json::to_value(&state).unwrap();
        let domain = &json["domain_data"]["e.test"];
        assert!(domain.get("structures").is_some());
        assert!(domain.get("visited").is_some());
        assert!(domain.get("url_tree").is_some());
        assert!(domain.get("stats").is_some());
    }

    #[test]
    fn bare_single_domain_payload_is_accepted() {
        let mut domain = DomainState::default();
        domain.record_page(&url("https://solo.test/page"), tid(1), None, None);
        let body = serde_json::to_string(&domain).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler_state_solo_test.json");
        std::fs::write(&path, body).unwrap();

        let state = CrawlState::load(&path).unwrap();
        assert_eq!(state.total_visited(), 1);
        assert!(state.domain("solo.test").is_some());
    }

    #[test]
    fn corrupt_state_is_reported_and_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler_state_x.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            CrawlState::load(&path),
            Err(AuditError::StateCorruption(_))
        ));
        let state = CrawlState::load_or_default(&path);
        assert_eq!(state.total_visited(), 0);
    }
}
