//! The hybrid crawl engine.
//!
//! Breadth-first frontier over one or more domains with bounded
//! concurrency, the heavy/light mode machine per domain, retrying fetches,
//! template clustering and periodic checkpointing.
//!
//! Per-URL lifecycle: `Queued -> Fetching -> (Parsed | RetryScheduled |
//! Failed)`; `Parsed` enqueues children. Per-domain lifecycle: `Heavy ->
//! (Switched -> Light | Heavy)`; once switched, the domain stays light
//! except for per-URL heavy fallbacks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::browser::BrowserHandle;
use crate::config::CrawlerConfig;
use crate::error::{AuditError, AuditResult, StageError};
use crate::output::OutputLayout;
use crate::template::template_fingerprint;
use crate::urlnorm::{domain_of, url_template, NormalizedUrl, UrlNormalizer};

use super::fetch::{
    heavy_fetch, needs_heavy_fallback, politeness_delay, FetchMode, FetchResponse, LightFetcher,
};
use super::health::DomainHealth;
use super::limiter::DomainLimiter;
use super::links::extract_links;
use super::state::CrawlState;

/// One frontier entry.
#[derive(Debug, Clone)]
struct CrawlItem {
    url: NormalizedUrl,
    domain: String,
    depth: u8,
    referrer: Option<NormalizedUrl>,
    /// Set when a light response demanded a heavy re-fetch.
    force_heavy: bool,
}

/// Per-domain fetch-mode machine.
#[derive(Debug, Clone, Copy)]
struct DomainMode {
    mode: FetchMode,
    switched: bool,
}

/// What the engine hands back: the state plus per-URL failures.
#[derive(Debug)]
pub struct CrawlOutcome {
    pub state: CrawlState,
    pub errors: Vec<StageError>,
    pub cancelled: bool,
}

/// Library-first crawler: `run` is a pure operation from configuration to
/// a persisted `CrawlState`; the CLI wrapper adds nothing but flags.
pub struct SiteCrawler {
    /// Seed entries as configured: bare hosts or full URLs.
    seeds: Vec<String>,
    /// Registrable hosts derived from the seeds; the allowed-domain list.
    allowed: Vec<String>,
    config: CrawlerConfig,
    normalizer: Arc<UrlNormalizer>,
    layouts: BTreeMap<String, OutputLayout>,
    /// Extra request headers per domain (HTTP Basic mostly).
    extra_headers: BTreeMap<String, HashMap<String, String>>,
}

impl SiteCrawler {
    pub fn new(
        domains: Vec<String>,
        config: CrawlerConfig,
        strip_www: bool,
        output_root: &std::path::Path,
    ) -> AuditResult<Self> {
        let mut layouts = BTreeMap::new();
        let mut allowed = Vec::new();
        for entry in &domains {
            let host = domain_of(entry).ok_or_else(|| {
                AuditError::Fatal(format!("'{entry}' is not a usable domain or seed URL"))
            })?;
            let layout = OutputLayout::create(output_root, &host)
                .map_err(|e| AuditError::Fatal(format!("output layout for {host}: {e:#}")))?;
            layouts.insert(host.clone(), layout);
            allowed.push(host);
        }
        Ok(Self {
            seeds: domains,
            allowed,
            config,
            normalizer: Arc::new(UrlNormalizer::new(strip_www)),
            layouts,
            extra_headers: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn with_extra_headers(
        mut self,
        headers: BTreeMap<String, HashMap<String, String>>,
    ) -> Self {
        self.extra_headers = headers;
        self
    }

    /// Crawl all configured domains to completion, checkpointing along the
    /// way. Cancellation drains in-flight fetches and persists state.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> AuditResult<CrawlOutcome> {
        let mut state = CrawlState::default();
        let mut errors = Vec::new();

        // Resume: prior visited sets suppress re-fetching.
        let visited: Arc<DashSet<String>> = Arc::new(DashSet::new());
        if self.config.resume {
            for (domain, layout) in &self.layouts {
                let prior = CrawlState::load_or_default(&layout.crawler_state_path());
                if let Some(domain_state) = prior.domain(domain) {
                    for url in &domain_state.visited {
                        visited.insert(url.as_str().to_string());
                    }
                }
                for (key, domain_state) in prior.domain_data {
                    state.domain_data.insert(key, domain_state);
                }
            }
        }

        // Zero budget is a no-op crawl, but the empty state file still
        // lands on disk so later stages see a well-formed artifact.
        if self.config.max_urls_per_domain == 0 {
            info!("max_urls_per_domain is 0: writing empty crawl state");
            self.checkpoint(&state)?;
            return Ok(CrawlOutcome {
                state,
                errors,
                cancelled: false,
            });
        }

        let mut queue: VecDeque<CrawlItem> = VecDeque::new();
        for entry in &self.seeds {
            let seed_raw = if entry.contains("://") {
                entry.clone()
            } else {
                format!("https://{entry}")
            };
            let host = domain_of(entry).unwrap_or_else(|| entry.clone());
            match self.normalizer.normalize(&seed_raw) {
                Ok(seed) => queue.push_back(CrawlItem {
                    url: seed,
                    domain: host,
                    depth: 0,
                    referrer: None,
                    force_heavy: false,
                }),
                Err(e) => errors.push(StageError::new(entry.clone(), &e)),
            }
        }

        let light = Arc::new(
            LightFetcher::new(&self.config)
                .map_err(|e| AuditError::Fatal(format!("building fetcher: {e:#}")))?,
        );

        // The heavy browser launches lazily on first use and is shared by
        // every heavy fetch in this run.
        let browser: Arc<Mutex<Option<BrowserHandle>>> = Arc::new(Mutex::new(None));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_requests));
        let limiter = Arc::new(DomainLimiter::new(self.config.concurrent_requests_per_domain));
        let health = DomainHealth::new(
            self.config.domain_error_rate_threshold,
            self.config.domain_error_min_attempts,
        );

        let mut modes: BTreeMap<String, DomainMode> = self
            .allowed
            .iter()
            .map(|d| {
                let initial = if self.config.hybrid_mode {
                    FetchMode::Heavy
                } else {
                    FetchMode::Light
                };
                (d.clone(), DomainMode { mode: initial, switched: false })
            })
            .collect();

        let mut domain_counts: BTreeMap<String, usize> =
            self.allowed.iter().map(|d| (d.clone(), 0)).collect();
        // Resumed pages count against the budget.
        for (domain, count) in domain_counts.iter_mut() {
            if let Some(ds) = state.domain(domain) {
                *count = ds.visited.len();
            }
        }
        let total_processed = AtomicUsize::new(state.total_visited());
        let mut since_checkpoint = 0usize;
        let mut cancelled = false;

        let mut active: FuturesUnordered<
            tokio::task::JoinHandle<(CrawlItem, Result<FetchResponse, AuditError>)>,
        > = FuturesUnordered::new();

        loop {
            if *cancel.borrow() {
                cancelled = true;
            }

            // Fill up to the concurrency limit.
            while !cancelled && active.len() < self.config.concurrent_requests {
                let Some(item) = queue.pop_front() else {
                    break;
                };

                if total_processed.load(Ordering::Relaxed) >= self.config.max_total_urls {
                    info!("reached max_total_urls={}", self.config.max_total_urls);
                    queue.clear();
                    break;
                }
                let count = domain_counts.get(&item.domain).copied().unwrap_or(0);
                if count >= self.config.max_urls_per_domain {
                    continue;
                }
                if health.is_abandoned(&item.domain) {
                    continue;
                }
                if !visited.insert(item.url.as_str().to_string()) {
                    continue;
                }

                // Heavy -> Light switch: after the threshold of pages, once
                // the pending queue has outgrown it, further pages are
                // assumed to be template duplicates.
                if self.config.hybrid_mode {
                    if let Some(mode) = modes.get_mut(&item.domain) {
                        if !mode.switched
                            && mode.mode == FetchMode::Heavy
                            && count >= self.config.pending_threshold
                            && queue.len() >= self.config.pending_threshold
                        {
                            mode.mode = FetchMode::Light;
                            mode.switched = true;
                            state
                                .domain_mut(&item.domain)
                                .stats
                                .hybrid_switch_to_http += 1;
                            info!(
                                "{}: switching to plain-HTTP mode after {count} pages \
                                 ({} pending)",
                                item.domain,
                                queue.len()
                            );
                        }
                    }
                }

                let mode = if item.force_heavy {
                    FetchMode::Heavy
                } else {
                    modes
                        .get(&item.domain)
                        .map(|m| m.mode)
                        .unwrap_or(FetchMode::Light)
                };

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let domain_permit = limiter.acquire(&item.domain).await;

                let light = Arc::clone(&light);
                let browser = Arc::clone(&browser);
                let headers = self
                    .extra_headers
                    .get(&item.domain)
                    .cloned()
                    .unwrap_or_default();
                let config = self.config.clone();
                let task_item = item.clone();

                active.push(tokio::spawn(async move {
                    let _permit = permit;
                    let _domain_permit = domain_permit;
                    politeness_delay(config.request_delay_ms).await;
                    let result =
                        fetch_one(&task_item, mode, &light, &browser, &headers, &config).await;
                    (task_item, result)
                }));
            }

            if active.is_empty() {
                break;
            }

            // Process one completion.
            let Some(joined) = active.next().await else {
                break;
            };
            let (item, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("crawl task panicked: {e}");
                    continue;
                }
            };

            match result {
                Ok(response) => {
                    health.record_success(&item.domain);

                    // A thin light response gets one heavy retry before it
                    // counts as processed.
                    if self.config.hybrid_mode
                        && response.mode == FetchMode::Light
                        && !item.force_heavy
                        && needs_heavy_fallback(response.status, &response.body)
                    {
                        debug!("{}: scheduling heavy re-fetch", item.url);
                        state.domain_mut(&item.domain).stats.hybrid_heavy_fallbacks += 1;
                        visited.remove(item.url.as_str());
                        queue.push_front(CrawlItem {
                            force_heavy: true,
                            ..item
                        });
                        continue;
                    }

                    let page_url = self
                        .normalizer
                        .normalize(&response.final_url)
                        .unwrap_or_else(|_| item.url.clone());

                    let domain_state = state.domain_mut(&item.domain);
                    domain_state.stats.success += 1;
                    domain_state.stats.retries += u64::from(response.retries);

                    let host = page_url.host().unwrap_or(&item.domain).to_string();
                    let template_id = template_fingerprint(&host, &response.body);
                    domain_state.record_page(
                        &page_url,
                        template_id,
                        Some(url_template(page_url.as_str())),
                        item.referrer.as_ref(),
                    );
                    *domain_counts.entry(item.domain.clone()).or_insert(0) += 1;
                    let processed = total_processed.fetch_add(1, Ordering::Relaxed) + 1;

                    debug!(
                        "[{processed}/{}] {} (depth {}, {:?})",
                        self.config.max_total_urls, page_url, item.depth, response.mode
                    );

                    // Enqueue children within the depth budget.
                    if item.depth < self.config.depth_limit && !cancelled {
                        let children = extract_links(
                            &response.body,
                            &page_url,
                            &self.allowed,
                            &self.normalizer,
                        );
                        let mut enqueued = 0usize;
                        for child in children {
                            if visited.contains(child.as_str()) {
                                continue;
                            }
                            let Some(child_domain) =
                                child.host().and_then(domain_of)
                            else {
                                continue;
                            };
                            if health.is_abandoned(&child_domain) {
                                continue;
                            }
                            queue.push_back(CrawlItem {
                                url: child,
                                domain: child_domain,
                                depth: item.depth + 1,
                                referrer: Some(page_url.clone()),
                                force_heavy: false,
                            });
                            enqueued += 1;
                        }
                        debug!("{}: enqueued {enqueued} children", page_url);
                    }

                    since_checkpoint += 1;
                    if since_checkpoint >= self.config.auto_save_interval {
                        since_checkpoint = 0;
                        self.checkpoint(&state)?;
                    }
                }
                Err(error) => {
                    // Blocked or rate-limited over plain HTTP: one more try
                    // under full browser rendering before giving up.
                    if self.config.hybrid_mode
                        && !item.force_heavy
                        && matches!(
                            &error,
                            AuditError::AccessDenied(_) | AuditError::Transient(_)
                        )
                    {
                        debug!("{}: scheduling heavy re-fetch after {error}", item.url);
                        state.domain_mut(&item.domain).stats.hybrid_heavy_fallbacks += 1;
                        visited.remove(item.url.as_str());
                        queue.push_front(CrawlItem {
                            force_heavy: true,
                            ..item
                        });
                        continue;
                    }

                    let domain_state = state.domain_mut(&item.domain);
                    match &error {
                        AuditError::AccessDenied(_) | AuditError::InvalidInput(_) => {
                            domain_state.stats.client_errors += 1;
                        }
                        _ => domain_state.stats.server_errors += 1,
                    }
                    warn!("{}: {error}", item.url);
                    errors.push(StageError::new(item.url.as_str().to_string(), &error));
                    if health.record_failure(&item.domain) {
                        queue.retain(|queued| queued.domain != item.domain);
                    }
                }
            }

            if cancelled && active.is_empty() {
                break;
            }
        }

        // Final persist, plus browser teardown.
        self.checkpoint(&state)?;
        if let Some(handle) = browser.lock().await.take() {
            drop(handle);
        }

        info!(
            "crawl finished: {} URLs across {} domain(s), {} template(s), {} error(s){}",
            state.total_visited(),
            state.domain_data.len(),
            state.total_templates(),
            errors.len(),
            if cancelled { " [cancelled]" } else { "" }
        );

        Ok(CrawlOutcome {
            state,
            errors,
            cancelled,
        })
    }

    /// Persist each domain's slice to its own layout.
    fn checkpoint(&self, state: &CrawlState) -> AuditResult<()> {
        for (domain, layout) in &self.layouts {
            let mut slice = CrawlState::default();
            if let Some(domain_state) = state.domain(domain) {
                slice
                    .domain_data
                    .insert(domain.clone(), domain_state.clone());
            } else {
                slice.domain_data.insert(domain.clone(), Default::default());
            }
            slice.save(layout)?;
        }
        Ok(())
    }
}

/// Fetch a single item in the requested mode, lazily launching the shared
/// heavy browser when first needed.
async fn fetch_one(
    item: &CrawlItem,
    mode: FetchMode,
    light: &LightFetcher,
    browser: &Mutex<Option<BrowserHandle>>,
    headers: &HashMap<String, String>,
    config: &CrawlerConfig,
) -> Result<FetchResponse, AuditError> {
    match mode {
        FetchMode::Light => light.fetch(item.url.as_str(), headers).await,
        FetchMode::Heavy => {
            let mut guard = browser.lock().await;
            if guard.is_none() {
                match BrowserHandle::launch(config.headless).await {
                    Ok(handle) => *guard = Some(handle),
                    Err(e) => {
                        warn!("heavy browser unavailable ({e:#}), degrading to plain HTTP");
                        drop(guard);
                        return light.fetch(item.url.as_str(), headers).await;
                    }
                }
            }
            let shared = guard.as_ref().expect("just ensured browser").browser_arc();
            drop(guard);

            let result = heavy_fetch(
                &shared,
                item.url.as_str(),
                std::time::Duration::from_secs(config.page_load_timeout_secs),
                std::time::Duration::from_secs(config.navigation_timeout_secs),
            )
            .await;

            match result {
                Err(AuditError::DriverFailure(msg)) => {
                    // Dead browser: drop it so the next heavy fetch
                    // relaunches, and serve this URL over HTTP instead.
                    warn!("heavy fetch failed ({msg}), recycling browser");
                    *browser.lock().await = None;
                    light.fetch(item.url.as_str(), headers).await
                }
                other => other,
            }
        }
    }
}
