//! Crawl-side URL filtering and the legacy path-template grouping.
//!
//! The filters keep static assets, admin backends and non-HTTP schemes out
//! of the frontier. `url_template` survives from an earlier grouping scheme;
//! the DOM fingerprint is authoritative for clustering and this is emitted
//! for diagnostics only.

use once_cell::sync::Lazy;
use regex::Regex;

/// Extensions that never yield scannable pages.
const EXCLUDED_EXTENSIONS: &[&str] = &[
    // images
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".ico", ".tiff",
    // documents
    ".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".csv",
    // audio / video
    ".mp3", ".mp4", ".avi", ".mov", ".flv", ".wmv", ".wav", ".ogg",
    // archives
    ".zip", ".rar", ".tar", ".gz", ".7z",
    // code / data
    ".css", ".js", ".json", ".xml",
    // other
    ".txt", ".md", ".exe", ".dmg", ".iso", ".apk", ".ipa",
];

/// Path fragments that mark static or administrative areas.
const EXCLUDED_PATHS: &[&str] = &[
    "/wp-content/uploads/",
    "/assets/",
    "/static/",
    "/images/",
    "/js/",
    "/css/",
    "/fonts/",
    "/download/",
    "/downloads/",
    "/media/",
    "/admin/",
    "/wp-admin/",
    "/wp-json/",
    "/wp-login",
    "/wp-includes/",
    "/xmlrpc.php",
];

static EXCLUDED_SCHEMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(javascript:|mailto:|tel:|data:|#|about:|file:|ftp:)")
        .expect("static scheme pattern compiles")
});

/// Whether a raw href is worth normalizing and enqueuing at all.
#[must_use]
pub fn is_crawlable(raw: &str) -> bool {
    let candidate = html_escape::decode_html_entities(raw.trim()).into_owned();
    if candidate.is_empty() {
        return false;
    }
    if EXCLUDED_SCHEMES.is_match(&candidate) {
        return false;
    }
    let lower = candidate.to_lowercase();
    if EXCLUDED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }
    if EXCLUDED_PATHS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    true
}

/// Extract the registrable host from a URL or bare domain, without `www.`.
#[must_use]
pub fn domain_of(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let host = if !input.contains('/') && !input.contains("://") {
        input.to_lowercase()
    } else {
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{input}")
        };
        let parsed = url::Url::parse(&with_scheme).ok()?;
        parsed.host_str()?.to_lowercase()
    };

    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Whether two URLs share a registrable domain (ignoring `www.`).
#[must_use]
pub fn is_same_domain(a: &str, b: &str) -> bool {
    match (domain_of(a), domain_of(b)) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

static NUM_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("static pattern compiles"));
static ID_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-f0-9\-]{8,}$").expect("static pattern compiles"));

/// Legacy URL-shape template: numeric segments become `{num}`, long
/// hyphenated slugs `{slug}`, hex/GUID segments `{id}`; prefixed with the
/// host for multi-domain runs.
#[must_use]
pub fn url_template(url: &str) -> String {
    let decoded = html_escape::decode_html_entities(url).into_owned();
    let parsed = match url::Url::parse(&decoded) {
        Ok(u) => u,
        Err(_) => return decoded,
    };

    let mut segments: Vec<String> = Vec::new();
    for seg in parsed.path().split('/').filter(|s| !s.is_empty()) {
        if ID_SEGMENT.is_match(seg) && seg.chars().any(|c| c.is_ascii_digit()) {
            segments.push("{id}".to_string());
            continue;
        }
        let numbered = NUM_SEGMENT.replace_all(seg, "{num}").into_owned();
        if numbered.contains('-') && numbered.len() > 10 {
            segments.push("{slug}".to_string());
        } else {
            segments.push(numbered);
        }
    }

    let path_template = format!("/{}", segments.join("/"));
    match domain_of(&decoded) {
        Some(domain) => format!("{domain}:{path_template}"),
        None => path_template,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_schemes_extensions_and_paths() {
        assert!(is_crawlable("https://e.test/products"));
        assert!(!is_crawlable("javascript:void(0)"));
        assert!(!is_crawlable("mailto:team@e.test"));
        assert!(!is_crawlable("https://e.test/logo.svg"));
        assert!(!is_crawlable("https://e.test/assets/app.css"));
        assert!(!is_crawlable("https://e.test/wp-admin/options.php"));
        assert!(!is_crawlable("#main"));
        assert!(!is_crawlable(""));
    }

    #[test]
    fn domain_extraction_handles_bare_and_full_forms() {
        assert_eq!(domain_of("e.test"), Some("e.test".into()));
        assert_eq!(domain_of("www.e.test"), Some("e.test".into()));
        assert_eq!(domain_of("https://WWW.E.test/path"), Some("e.test".into()));
        assert_eq!(domain_of(""), None);
    }

    #[test]
    fn same_domain_ignores_www() {
        assert!(is_same_domain("https://www.e.test/a", "https://e.test/b"));
        assert!(!is_same_domain("https://e.test", "https://other.test"));
    }

    #[test]
    fn path_templates_collapse_variable_segments() {
        assert_eq!(
            url_template("https://e.test/product/12345"),
            "e.test:/product/{num}"
        );
        assert_eq!(
            url_template("https://e.test/blog/a-very-long-post-title"),
            "e.test:/blog/{slug}"
        );
        assert_eq!(
            url_template("https://e.test/order/a1b2c3d4-e5f6"),
            "e.test:/order/{id}"
        );
        assert_eq!(url_template("https://e.test/about"), "e.test:/about");
    }
}
