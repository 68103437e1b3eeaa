//! Authentication: login flows and transferable sessions.
//!
//! The driver *produces values* (cookies and a header function) that the
//! scanner and funnel executor consume. No live browser session is shared
//! across stages: each consumer applies the session to its own driver.

mod driver;

pub use driver::AuthDriver;

use std::collections::HashMap;

use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AuthDomainConfig;

/// A captured browser cookie, independent of any CDP types so sessions can
/// be persisted and re-applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expires: Option<f64>,
}

/// Restricted-URL matcher: a URL is restricted iff it starts with any
/// configured prefix or matches any configured pattern.
#[derive(Debug, Clone, Default)]
pub struct RestrictedUrls {
    prefixes: Vec<String>,
    patterns: Vec<Regex>,
}

impl RestrictedUrls {
    #[must_use]
    pub fn from_config(config: &AuthDomainConfig) -> Self {
        let patterns = config
            .restricted_url_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("ignoring invalid restricted-URL pattern '{p}': {e}");
                    None
                }
            })
            .collect();
        Self {
            prefixes: config.restricted_url_prefixes.clone(),
            patterns,
        }
    }

    #[must_use]
    pub fn is_restricted(&self, url: &str) -> bool {
        self.prefixes.iter().any(|p| url.starts_with(p.as_str()))
            || self.patterns.iter().any(|re| re.is_match(url))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.patterns.is_empty()
    }

    /// The static prefix list, used to enumerate scan targets.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

/// The transferable product of a login: cookies plus an optional Basic
/// authorization value, scoped by the restricted-URL matcher.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    pub domain: String,
    pub authenticated: bool,
    pub cookies: Vec<SessionCookie>,
    /// Full `Authorization` header value when HTTP Basic is configured.
    basic_authorization: Option<String>,
    restricted: RestrictedUrls,
}

impl AuthSession {
    /// An empty, unauthenticated session: restricted URLs will be skipped.
    #[must_use]
    pub fn unauthenticated(domain: &str, restricted: RestrictedUrls) -> Self {
        Self {
            domain: domain.to_string(),
            authenticated: false,
            cookies: Vec::new(),
            basic_authorization: None,
            restricted,
        }
    }

    #[must_use]
    pub fn new(
        domain: &str,
        cookies: Vec<SessionCookie>,
        basic_authorization: Option<String>,
        restricted: RestrictedUrls,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            authenticated: true,
            cookies,
            basic_authorization,
            restricted,
        }
    }

    #[must_use]
    pub fn is_restricted(&self, url: &str) -> bool {
        self.restricted.is_restricted(url)
    }

    #[must_use]
    pub fn restricted(&self) -> &RestrictedUrls {
        &self.restricted
    }

    /// Add `Authorization` when the URL is restricted and Basic credentials
    /// exist. A non-restricted URL passes through untouched.
    #[must_use]
    pub fn apply_to_headers(
        &self,
        url: &str,
        mut headers: HashMap<String, String>,
    ) -> HashMap<String, String> {
        if self.is_restricted(url) {
            if let Some(basic) = &self.basic_authorization {
                headers.insert("Authorization".to_string(), basic.clone());
            }
        }
        headers
    }

    /// Inject the session cookies into a page. The caller should navigate
    /// to the cookie domain first so same-site rules accept them.
    pub async fn apply_to_page(&self, page: &chromiumoxide::Page) -> anyhow::Result<()> {
        use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};

        if self.cookies.is_empty() {
            return Ok(());
        }
        let params: Vec<CookieParam> = self
            .cookies
            .iter()
            .filter_map(|c| {
                // Expiry is not carried over; scan-lifetime session cookies
                // are all the consumers need.
                CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .secure(c.secure)
                    .http_only(c.http_only)
                    .build()
                    .ok()
            })
            .collect();
        let count = params.len();
        page.execute(SetCookiesParams::new(params))
            .await
            .map_err(|e| anyhow::anyhow!("injecting session cookies: {e}"))?;
        tracing::debug!("injected {count} session cookies for {}", self.domain);
        Ok(())
    }
}

/// Encode HTTP Basic credentials into a header value.
#[must_use]
pub fn basic_authorization(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}
