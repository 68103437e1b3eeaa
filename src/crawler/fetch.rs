//! Hybrid page fetching: plain HTTP (light) and browser rendering (heavy).
//!
//! Light fetches carry the retry policy: exponential backoff with jitter on
//! retryable statuses and connection errors, honoring `Retry-After` when a
//! server sends one. Heavy fetches go through chromiumoxide and exist for
//! JS-driven sites, consent interstitials, and 403/429 fallbacks.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chromiumoxide::Browser;
use once_cell::sync::Lazy;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use tracing::{debug, warn};

use crate::config::CrawlerConfig;
use crate::error::AuditError;

/// Statuses worth retrying. 403 is included: bot walls frequently clear on
/// a later attempt or under browser rendering.
pub const RETRYABLE_STATUS: &[u16] = &[500, 502, 503, 504, 408, 429, 403, 520, 521, 522, 523, 524];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Heavy,
    Light,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub mode: FetchMode,
    pub retries: u32,
}

/// Markers that suggest a thin response actually needs JS rendering.
const JS_INDICATORS: &[&str] = &[
    "window.addEventListener",
    "document.addEventListener",
    "axios",
    "fetch(",
    "window.onload",
    "jQuery",
];

const JS_FRAMEWORK_MARKERS: &[&str] = &[
    "ng-app",
    "data-reactroot",
    "data-react",
    "vue-app",
    "data-vue",
    "ember-app",
    "svelte",
    "alpinejs",
];

static BODY_CONTENT: Lazy<regex::Regex> = Lazy::new(|| {
    regex::RegexBuilder::new(r"<body[^>]*>(.*?)</body>")
        .dot_matches_new_line(true)
        .build()
        .expect("static body pattern compiles")
});

/// Whether a light response should be re-fetched in heavy mode.
#[must_use]
pub fn needs_heavy_fallback(status: u16, body: &str) -> bool {
    if status == 403 || status == 429 {
        return true;
    }
    if body.len() < 5000 {
        if JS_INDICATORS.iter().any(|marker| body.contains(marker)) {
            return true;
        }
        if let Some(captures) = BODY_CONTENT.captures(body) {
            if captures
                .get(1)
                .map(|m| m.as_str().trim().len() < 200)
                .unwrap_or(false)
            {
                return true;
            }
        }
    }
    JS_FRAMEWORK_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Backoff policy derived from the crawler config. Jitter comes from the
/// backoff crate's randomization factor.
fn backoff_policy(config: &CrawlerConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(config.retry_delay_ms),
        max_interval: Duration::from_millis(config.retry_delay_max_ms),
        multiplier: 2.0,
        randomization_factor: 0.3,
        // The attempt counter bounds the loop, not elapsed time.
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Plain-HTTP fetcher with the retry policy baked in.
pub struct LightFetcher {
    client: reqwest::Client,
    config: CrawlerConfig,
}

impl LightFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.page_load_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
            )
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// GET with retries. Extra headers ride along on every attempt (the
    /// auth driver's Basic credentials arrive this way).
    pub async fn fetch(
        &self,
        url: &str,
        extra_headers: &HashMap<String, String>,
    ) -> Result<FetchResponse, AuditError> {
        let mut policy = backoff_policy(&self.config);
        let mut attempt: u32 = 0;

        loop {
            match self.fetch_once(url, extra_headers).await {
                Ok((status, final_url, body, headers)) => {
                    if RETRYABLE_STATUS.contains(&status) && attempt < self.config.retry_times {
                        attempt += 1;
                        let delay = parse_retry_after(&headers)
                            .or_else(|| policy.next_backoff())
                            .unwrap_or_else(|| Duration::from_millis(self.config.retry_delay_ms));
                        debug!(
                            "retrying {url} after {status} (attempt {attempt}/{}, waiting {delay:?})",
                            self.config.retry_times
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // Either the retry budget is spent or the status was
                    // never retryable; both surface as classified errors.
                    if let Some(error) = AuditError::from_status(status, url) {
                        return Err(error);
                    }

                    return Ok(FetchResponse {
                        final_url,
                        status,
                        body,
                        mode: FetchMode::Light,
                        retries: attempt,
                    });
                }
                Err(e) if attempt < self.config.retry_times => {
                    attempt += 1;
                    let delay = policy
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_millis(self.config.retry_delay_ms));
                    debug!(
                        "retrying {url} after connection error (attempt {attempt}/{}): {e}",
                        self.config.retry_times
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(AuditError::Transient(format!("{url}: {e}")));
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        extra_headers: &HashMap<String, String>,
    ) -> Result<(u16, String, String, HeaderMap)> {
        let mut request = self.client.get(url);
        for (name, value) in extra_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                request = request.header(name, value);
            }
        }
        let response = request.send().await.context("sending request")?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let final_url = response.url().to_string();
        let body = response.text().await.context("reading body")?;
        Ok((status, final_url, body, headers))
    }
}

/// Browser-rendered fetch on an existing browser. A consent-dismissal and
/// lazy-load nudge runs before the DOM is serialized.
pub async fn heavy_fetch(
    browser: &Browser,
    url: &str,
    page_load_timeout: Duration,
    navigation_timeout: Duration,
) -> Result<FetchResponse, AuditError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| AuditError::DriverFailure(format!("new page: {e}")))?;

    let result = heavy_fetch_on_page(&page, url, page_load_timeout, navigation_timeout).await;
    page.close().await.ok();
    result
}

async fn heavy_fetch_on_page(
    page: &chromiumoxide::Page,
    url: &str,
    page_load_timeout: Duration,
    navigation_timeout: Duration,
) -> Result<FetchResponse, AuditError> {
    tokio::time::timeout(page_load_timeout, page.goto(url))
        .await
        .map_err(|_| AuditError::Transient(format!("{url}: page load timeout")))?
        .map_err(|e| AuditError::DriverFailure(format!("{url}: {e}")))?;

    if tokio::time::timeout(navigation_timeout, page.wait_for_navigation())
        .await
        .is_err()
    {
        warn!("{url}: navigation wait timed out, serializing current DOM");
    }

    // Consent banners and lazy-loaded content distort template signatures;
    // nudge both before reading the DOM.
    crate::browser::page_ops::dismiss_cookie_banner(page).await.ok();
    let _ = page
        .evaluate("window.scrollTo(0, document.body.scrollHeight / 2)")
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let body = page
        .content()
        .await
        .map_err(|e| AuditError::DriverFailure(format!("{url}: content: {e}")))?;
    let final_url = crate::browser::page_ops::page_url_or_blank(page).await;

    Ok(FetchResponse {
        final_url,
        status: 200,
        body,
        mode: FetchMode::Heavy,
        retries: 0,
    })
}

/// Politeness jitter: the configured delay plus up to 50% random slack.
pub async fn politeness_delay(request_delay_ms: u64) {
    if request_delay_ms == 0 {
        return;
    }
    let jitter = rand::rng().random_range(0..=request_delay_ms / 2);
    tokio::time::sleep(Duration::from_millis(request_delay_ms + jitter)).await;
}
