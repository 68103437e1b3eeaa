//! URL normalization and page identity.
//!
//! Two URLs are the same page iff their normalized forms are byte-equal, so
//! everything downstream (visited sets, dedup keys, template membership)
//! hangs off [`NormalizedUrl`]. Normalization is idempotent by construction:
//! re-normalizing a canonical string reproduces it.

mod filters;
mod page_type;

pub use filters::{domain_of, is_crawlable, is_same_domain, url_template};
pub use page_type::{page_type, PageType};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashSet;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;
use url::Url;

use crate::error::{AuditError, AuditResult};

/// An immutable, cheaply-cloneable canonical URL.
///
/// The canonical string is the identity: `Eq`, `Ord`, `Hash` and serde all
/// go through it. The parsed [`Url`] is shared behind an `Arc` for component
/// access without re-parsing.
#[derive(Debug, Clone)]
pub struct NormalizedUrl {
    canonical: String,
    url: Arc<Url>,
}

impl NormalizedUrl {
    /// Normalize a raw URL without a cache. Prefer [`UrlNormalizer`] on hot
    /// paths.
    pub fn parse(raw: &str, strip_www: bool) -> AuditResult<Self> {
        let trimmed = html_escape::decode_html_entities(raw.trim()).into_owned();
        if trimmed.is_empty() {
            return Err(AuditError::InvalidInput("empty URL".into()));
        }

        // Scheme-less inputs get https, matching how seed domains arrive.
        // Anything carrying a non-web scheme (mailto:, tel:, data:, ...) is
        // rejected rather than mangled into a hostname.
        let lowered_prefix = trimmed
            .get(..8)
            .map(str::to_lowercase)
            .unwrap_or_else(|| trimmed.to_lowercase());
        let with_scheme = if lowered_prefix.starts_with("http://")
            || lowered_prefix.starts_with("https://")
            || lowered_prefix.starts_with("file://")
        {
            trimmed
        } else if trimmed.starts_with("//") {
            format!("https:{trimmed}")
        } else if has_scheme_prefix(&trimmed) {
            return Err(AuditError::InvalidInput(format!(
                "unsupported scheme in '{trimmed}'"
            )));
        } else {
            format!("https://{trimmed}")
        };

        let mut url = Url::parse(&with_scheme)
            .map_err(|e| AuditError::InvalidInput(format!("'{with_scheme}': {e}")))?;

        // The url crate already lowercases scheme and host; www-stripping is
        // a policy decision layered on top. All leading `www.` labels go at
        // once, keeping normalization idempotent for hosts like
        // `www.www.e.test`.
        if strip_www {
            if let Some(host) = url.host_str() {
                let mut bare = host;
                while let Some(stripped) = bare.strip_prefix("www.") {
                    if stripped.is_empty() {
                        break;
                    }
                    bare = stripped;
                }
                if bare != host {
                    let bare = bare.to_string();
                    url.set_host(Some(&bare)).map_err(|e| {
                        AuditError::InvalidInput(format!("host rewrite failed: {e}"))
                    })?;
                }
            }
        }

        // A bare "#" fragment carries no routing information.
        if url.fragment() == Some("") {
            url.set_fragment(None);
        }

        // Trailing slash is dropped only when no fragment is present; SPA
        // routes like /app/#/settings keep their path byte-for-byte.
        if url.fragment().is_none() {
            let path = url.path();
            if path.len() > 1 && path.ends_with('/') {
                let trimmed_path = path.trim_end_matches('/').to_string();
                url.set_path(&trimmed_path);
            }
        }

        let canonical = url.as_str().to_string();
        Ok(Self {
            canonical,
            url: Arc::new(url),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.url.fragment()
    }

    /// Access the underlying parsed URL.
    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// Resolve a (possibly relative) href against this URL, normalizing the
    /// result under the same policy that produced `self`.
    pub fn join(&self, href: &str, strip_www: bool) -> AuditResult<Self> {
        let decoded = html_escape::decode_html_entities(href.trim()).into_owned();
        let joined = self
            .url
            .join(&decoded)
            .map_err(|e| AuditError::InvalidInput(format!("join '{decoded}': {e}")))?;
        Self::parse(joined.as_str(), strip_www)
    }
}

/// Whether the input opens with an RFC 3986 scheme followed by `:` before
/// any path separator. Port-style inputs (`host:8080/...`) are caught too;
/// callers should pass full URLs or bare hosts.
fn has_scheme_prefix(input: &str) -> bool {
    let colon = match input.find(':') {
        Some(index) => index,
        None => return false,
    };
    if let Some(slash) = input.find('/') {
        if slash < colon {
            return false;
        }
    }
    let prefix = &input[..colon];
    let mut chars = prefix.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl PartialEq for NormalizedUrl {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for NormalizedUrl {}

impl PartialOrd for NormalizedUrl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NormalizedUrl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl Hash for NormalizedUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl Serialize for NormalizedUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for NormalizedUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        // Persisted values are already canonical; re-parsing is idempotent.
        Self::parse(&s, false).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

const NORMALIZE_CACHE_CAPACITY: usize = 8192;

/// Caching normalizer with a fixed `www.`-stripping policy.
///
/// Invalid inputs are logged once per distinct input and then silently
/// rejected, so a page full of `javascript:` hrefs does not flood the log.
pub struct UrlNormalizer {
    strip_www: bool,
    cache: Mutex<LruCache<String, NormalizedUrl>>,
    reported_invalid: DashSet<String>,
}

impl UrlNormalizer {
    #[must_use]
    pub fn new(strip_www: bool) -> Self {
        let capacity = NonZeroUsize::new(NORMALIZE_CACHE_CAPACITY)
            .expect("cache capacity constant is non-zero");
        Self {
            strip_www,
            cache: Mutex::new(LruCache::new(capacity)),
            reported_invalid: DashSet::new(),
        }
    }

    #[must_use]
    pub fn strip_www(&self) -> bool {
        self.strip_www
    }

    pub fn normalize(&self, raw: &str) -> AuditResult<NormalizedUrl> {
        if let Some(hit) = self.cache.lock().get(raw) {
            return Ok(hit.clone());
        }

        match NormalizedUrl::parse(raw, self.strip_www) {
            Ok(normalized) => {
                self.cache
                    .lock()
                    .put(raw.to_string(), normalized.clone());
                Ok(normalized)
            }
            Err(e) => {
                if self.reported_invalid.insert(raw.to_string()) {
                    warn!("skipping unnormalizable URL '{raw}': {e}");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        let cases = [
            "https://Example.COM/Path/",
            "example.com/about/",
            "https://e.test/page#section",
            "https://e.test/app/#/route",
            "https://e.test/?b=2&a=1",
            "//cdn.e.test/asset",
        ];
        for raw in cases {
            let once = NormalizedUrl::parse(raw, false).unwrap();
            let twice = NormalizedUrl::parse(once.as_str(), false).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn lowercases_scheme_and_host_only() {
        let url = NormalizedUrl::parse("HTTPS://Example.COM/MiXeD/CaSe", false).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host(), Some("example.com"));
        assert_eq!(url.path(), "/MiXeD/CaSe");
    }

    #[test]
    fn www_stripping_is_policy_gated() {
        let kept = NormalizedUrl::parse("https://www.e.test/x", false).unwrap();
        assert_eq!(kept.host(), Some("www.e.test"));
        let stripped = NormalizedUrl::parse("https://www.e.test/x", true).unwrap();
        assert_eq!(stripped.host(), Some("e.test"));
    }

    #[test]
    fn fragment_rules() {
        let bare = NormalizedUrl::parse("https://e.test/page#", false).unwrap();
        assert_eq!(bare.fragment(), None);

        let kept = NormalizedUrl::parse("https://e.test/page#intro", false).unwrap();
        assert_eq!(kept.fragment(), Some("intro"));

        // Trailing slash survives when a fragment is present.
        let spa = NormalizedUrl::parse("https://e.test/app/#/settings", false).unwrap();
        assert_eq!(spa.path(), "/app/");

        let plain = NormalizedUrl::parse("https://e.test/app/", false).unwrap();
        assert_eq!(plain.path(), "/app");
    }

    #[test]
    fn root_path_is_preserved() {
        let root = NormalizedUrl::parse("https://e.test/", false).unwrap();
        assert_eq!(root.path(), "/");
    }

    #[test]
    fn query_order_is_preserved() {
        let url = NormalizedUrl::parse("https://e.test/s?z=1&a=2", false).unwrap();
        assert_eq!(url.query(), Some("z=1&a=2"));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(NormalizedUrl::parse("", false).is_err());
        assert!(NormalizedUrl::parse("   ", false).is_err());
        assert!(NormalizedUrl::parse("mailto:a@e.test", false).is_err());
    }

    #[test]
    fn byte_equality_defines_identity() {
        let a = NormalizedUrl::parse("https://e.test/about/", false).unwrap();
        let b = NormalizedUrl::parse("https://e.test/about", false).unwrap();
        assert_eq!(a, b);

        let c = NormalizedUrl::parse("https://e.test/about?x=1", false).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn join_resolves_relative_links() {
        let base = NormalizedUrl::parse("https://e.test/a/b", false).unwrap();
        let joined = base.join("../contact/", false).unwrap();
        assert_eq!(joined.as_str(), "https://e.test/contact");
    }

    #[test]
    fn serde_round_trip() {
        let url = NormalizedUrl::parse("https://e.test/page#x", false).unwrap();
        let json = serde_json::to_string(&url).unwrap();
        let back: NormalizedUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(url, back);
    }

    #[test]
    fn normalizer_cache_returns_same_value() {
        let normalizer = UrlNormalizer::new(true);
        let first = normalizer.normalize("https://WWW.e.test/a/").unwrap();
        let second = normalizer.normalize("https://WWW.e.test/a/").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "https://e.test/a");
    }
}
