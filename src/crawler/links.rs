//! Outbound-link extraction.
//!
//! Three extractors run over every page and their results are unioned: the
//! DOM anchor scan, meta-refresh targets, and a regex fallback for hrefs
//! that appear outside well-formed anchors (JS-built markup, commented
//! navigation). Extraction is deliberately greedy; the filters and the
//! allowed-domain check prune afterwards.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::trace;

use crate::urlnorm::{domain_of, is_crawlable, NormalizedUrl, UrlNormalizer};

static HREF_FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href\s*=\s*["']([^"'<>\s]+)["']"#).expect("static href pattern compiles")
});

static META_REFRESH_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\s*=\s*([^;"'\s]+)"#).expect("static meta-refresh pattern compiles")
});

/// Extract, normalize and filter outbound links.
///
/// Returned URLs are unique, normalized, on an allowed domain, and
/// crawlable by the static filters.
#[must_use]
pub fn extract_links(
    html: &str,
    base: &NormalizedUrl,
    allowed_domains: &[String],
    normalizer: &UrlNormalizer,
) -> Vec<NormalizedUrl> {
    let mut raw: BTreeSet<String> = BTreeSet::new();

    let document = Html::parse_document(html);

    // Anchor scan.
    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                raw.insert(href.to_string());
            }
        }
    }

    // Meta refresh.
    if let Ok(selector) = Selector::parse(r#"meta[http-equiv]"#) {
        for element in document.select(&selector) {
            let equiv = element.value().attr("http-equiv").unwrap_or_default();
            if !equiv.eq_ignore_ascii_case("refresh") {
                continue;
            }
            if let Some(content) = element.value().attr("content") {
                if let Some(captures) = META_REFRESH_URL.captures(content) {
                    if let Some(target) = captures.get(1) {
                        raw.insert(target.as_str().to_string());
                    }
                }
            }
        }
    }

    // Regex fallback over the raw markup.
    for captures in HREF_FALLBACK.captures_iter(html) {
        if let Some(href) = captures.get(1) {
            raw.insert(href.as_str().to_string());
        }
    }

    let mut links: BTreeSet<NormalizedUrl> = BTreeSet::new();
    for href in raw {
        if !is_crawlable(&href) {
            continue;
        }
        let Ok(normalized) = base.join(&href, normalizer.strip_www()) else {
            continue;
        };
        if normalized.scheme() != "http" && normalized.scheme() != "https" {
            continue;
        }
        let Some(domain) = normalized.host().and_then(domain_of) else {
            continue;
        };
        if !allowed_domains.iter().any(|allowed| *allowed == domain) {
            trace!("dropping off-domain link {}", normalized);
            continue;
        }
        links.insert(normalized);
    }

    links.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NormalizedUrl {
        NormalizedUrl::parse("https://e.test/start", false).unwrap()
    }

    fn norm() -> UrlNormalizer {
        UrlNormalizer::new(false)
    }

    fn extract(html: &str) -> Vec<String> {
        extract_links(html, &base(), &["e.test".to_string()], &norm())
            .into_iter()
            .map(|u| u.as_str().to_string())
            .collect()
    }

    #[test]
    fn unions_anchors_meta_refresh_and_fallback() {
        let html = r#"
            <html><head>
              <meta http-equiv="refresh" content="0; url=/landing">
            </head><body>
              <a href="/about">About</a>
              <div data-nav="&lt;a href=&quot;/hidden&quot;&gt;"></div>
              <script>var tpl = '<a href="/from-script">x</a>';</script>
            </body></html>
        "#;
        let links = extract(html);
        assert!(links.contains(&"https://e.test/about".to_string()));
        assert!(links.contains(&"https://e.test/landing".to_string()));
        assert!(links.contains(&"https://e.test/from-script".to_string()));
    }

    #[test]
    fn filters_blocked_and_offsite_links() {
        let html = r#"
            <body>
              <a href="/ok">ok</a>
              <a href="https://other.test/elsewhere">offsite</a>
              <a href="/brochure.pdf">pdf</a>
              <a href="mailto:x@e.test">mail</a>
              <a href="javascript:void(0)">js</a>
              <a href="/assets/app.css">css</a>
            </body>
        "#;
        let links = extract(html);
        assert_eq!(links, vec!["https://e.test/ok".to_string()]);
    }

    #[test]
    fn relative_links_resolve_against_base() {
        let html = r#"<body><a href="deeper/page">rel</a></body>"#;
        let links = extract(html);
        assert_eq!(links, vec!["https://e.test/deeper/page".to_string()]);
    }

    #[test]
    fn duplicates_collapse() {
        let html = r#"
            <body>
              <a href="/about">one</a>
              <a href="/about/">two</a>
              <a href="https://e.test/about">three</a>
            </body>
        "#;
        let links = extract(html);
        assert_eq!(links.len(), 1);
    }
}
