//! Template identity and clustering.
//!
//! A template is a cluster of URLs whose rendered DOM structure hashes to
//! the same fingerprint. The fingerprint looks only at the page skeleton
//! (landmark child counts and heading counts), so a hundred product pages
//! collapse into one cluster while the homepage stays its own.

use std::collections::BTreeSet;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::urlnorm::NormalizedUrl;

/// Structural selectors inspected for the signature, in fixed order.
const STRUCTURAL_SELECTORS: &[&str] = &["header", "footer", "main", "nav", "aside"];
const HEADING_SELECTORS: &[&str] = &["h1", "h2", "h3"];

/// Stable per-domain fingerprint of a page's DOM structure.
///
/// Formatted `host:xxh3-hex`. Two pages with identical structural signatures
/// produce identical ids regardless of path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host prefix, if the id is well-formed.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.0.split(':').next()
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TemplateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Build the ordered signature tuple from rendered HTML.
///
/// For each structural selector the first matching element contributes its
/// element-child count; absent selectors contribute nothing. Heading
/// selectors contribute total element counts. The tuple serializes as
/// `selector:count` segments joined with `|`.
#[must_use]
pub fn structural_signature(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::with_capacity(8);

    for name in STRUCTURAL_SELECTORS {
        let selector = match Selector::parse(name) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Some(element) = document.select(&selector).next() {
            let child_count = element
                .children()
                .filter(|child| child.value().is_element())
                .count();
            parts.push(format!("{name}:{child_count}"));
        }
    }

    for name in HEADING_SELECTORS {
        let selector = match Selector::parse(name) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let count = document.select(&selector).count();
        parts.push(format!("{name}:{count}"));
    }

    parts.join("|")
}

/// Hash the structural signature of a page and prefix it with the host so
/// ids are unique per domain.
#[must_use]
pub fn template_fingerprint(host: &str, html: &str) -> TemplateId {
    let signature = structural_signature(html);
    let digest = xxh3_64(signature.as_bytes());
    TemplateId(format!("{host}:{digest:016x}"))
}

/// A cluster of same-template pages with its elected representative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCluster {
    pub template_id: TemplateId,
    pub representative_url: NormalizedUrl,
    pub member_urls: BTreeSet<NormalizedUrl>,
    pub count: usize,
    /// Legacy URL-shape template of the representative, diagnostic only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

impl TemplateCluster {
    #[must_use]
    pub fn new(template_id: TemplateId, first_member: NormalizedUrl) -> Self {
        let mut member_urls = BTreeSet::new();
        member_urls.insert(first_member.clone());
        Self {
            template_id,
            representative_url: first_member,
            member_urls,
            count: 1,
            url_template: None,
        }
    }

    /// Add a member, re-electing the representative when the newcomer has a
    /// shorter path (ties broken lexicographically on the canonical form).
    pub fn insert(&mut self, url: NormalizedUrl) {
        if self.member_urls.insert(url.clone()) {
            if Self::beats(&url, &self.representative_url) {
                self.representative_url = url;
            }
            self.count = self.member_urls.len();
        }
    }

    fn beats(candidate: &NormalizedUrl, incumbent: &NormalizedUrl) -> bool {
        let cand_key = (candidate.path().len(), candidate.as_str());
        let inc_key = (incumbent.path().len(), incumbent.as_str());
        cand_key < inc_key
    }

    /// Invariant check used by tests and the state loader: count matches
    /// membership and the representative is a member with minimal path.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.count != self.member_urls.len() {
            return false;
        }
        if !self.member_urls.contains(&self.representative_url) {
            return false;
        }
        let min_path = self
            .member_urls
            .iter()
            .map(|u| u.path().len())
            .min()
            .unwrap_or(0);
        self.representative_url.path().len() == min_path
    }
}
