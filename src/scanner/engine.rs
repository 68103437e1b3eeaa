//! The scanning engine: a bounded pool of browser workers fed from a
//! bounded channel.
//!
//! Producers block when the channel fills, giving natural backpressure.
//! Workers navigate, settle, inject axe, and flatten results; a worker
//! whose browser dies discards it, the pool replaces it, and the URL gets
//! one more attempt before being marked failed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::browser::{DriverPool, page_ops};
use crate::config::ScannerConfig;
use crate::error::{AuditError, AuditResult, StageError};
use crate::funnel::FunnelArtifacts;
use crate::output::OutputLayout;
use crate::report_io::{JsonWorkbookWriter, SheetNamer, Workbook, WorkbookWriter};
use crate::urlnorm::UrlNormalizer;

use super::axe::{AxeResults, AXE_PRESENT_SCRIPT, AXE_RUN_SCRIPT};
use super::visited::VisitedSet;
use super::{Impact, Violation, ViolationSet};

/// One unit of scanning work.
#[derive(Debug, Clone)]
pub struct ScanTask {
    pub url: String,
    pub auth_required: bool,
    pub funnel_name: Option<String>,
    pub funnel_step: Option<String>,
    pub step_number: Option<usize>,
}

impl ScanTask {
    #[must_use]
    pub fn page(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_required: false,
            funnel_name: None,
            funnel_step: None,
            step_number: None,
        }
    }

    /// Tasks for every captured snapshot of the given funnels, addressed
    /// as `file://` URLs.
    #[must_use]
    pub fn for_funnels(artifacts: &[FunnelArtifacts]) -> Vec<Self> {
        let mut tasks = Vec::new();
        for outcome in artifacts {
            for artifact in outcome.scannable_snapshots() {
                let path = artifact.html_snapshot_path.display();
                tasks.push(Self {
                    url: format!("file://{path}"),
                    auth_required: false,
                    funnel_name: Some(outcome.funnel_id.clone()),
                    funnel_step: Some(artifact.step_name.clone()),
                    step_number: Some(artifact.step_index + 1),
                });
            }
        }
        tasks
    }
}

/// What a scan run produced.
#[derive(Debug)]
pub struct ScanOutcome {
    pub violations: ViolationSet,
    /// Every URL that completed the axe pass this run, in completion order.
    pub scanned_urls: Vec<String>,
    pub errors: Vec<StageError>,
}

pub struct AxeScanner {
    config: ScannerConfig,
    layout: OutputLayout,
    normalizer: Arc<UrlNormalizer>,
    auth: Option<AuthSession>,
}

impl AxeScanner {
    #[must_use]
    pub fn new(
        config: ScannerConfig,
        layout: OutputLayout,
        strip_www: bool,
        auth: Option<AuthSession>,
    ) -> Self {
        Self {
            config,
            layout,
            normalizer: Arc::new(UrlNormalizer::new(strip_www)),
            auth,
        }
    }

    /// Scan all tasks, honoring the visited set, and persist the visited
    /// file as work progresses.
    pub async fn scan(
        &self,
        tasks: Vec<ScanTask>,
        cancel: watch::Receiver<bool>,
    ) -> AuditResult<ScanOutcome> {
        let visited = Arc::new(
            VisitedSet::open(&self.layout, self.config.resume)
                .map_err(|e| AuditError::Fatal(format!("opening visited file: {e:#}")))?,
        );

        let pending: Vec<ScanTask> = tasks
            .into_iter()
            .filter(|t| !visited.contains(&t.url))
            .collect();
        info!(
            "{} pending URLs to scan ({} already visited)",
            pending.len(),
            visited.len()
        );

        let mut outcome = ScanOutcome {
            violations: ViolationSet::new(),
            scanned_urls: Vec::new(),
            errors: Vec::new(),
        };
        if pending.is_empty() {
            return Ok(outcome);
        }

        // Unresolvable axe source degrades the domain rather than killing
        // the whole run; other domains may still have a cached copy.
        let axe_source = Arc::new(
            super::axe::resolve_axe_source(self.config.axe_script_path.as_deref(), &self.layout)
                .await
                .map_err(|e| AuditError::Transient(format!("resolving axe-core: {e:#}")))?,
        );

        let pool = DriverPool::launch(self.config.pool_size, self.config.headless)
            .await
            .map_err(|e| AuditError::DriverFailure(format!("launching driver pool: {e:#}")))?;

        // Bounded work channel: the feeder blocks when workers fall behind.
        let (task_tx, task_rx) = mpsc::channel::<ScanTask>(self.config.pool_size * 2);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) =
            mpsc::channel::<(ScanTask, Result<Vec<Violation>, AuditError>)>(64);

        let feeder_cancel = cancel.clone();
        let feeder = tokio::spawn(async move {
            for task in pending {
                if *feeder_cancel.borrow() {
                    break;
                }
                if task_tx.send(task).await.is_err() {
                    break;
                }
            }
        });

        let mut workers = Vec::new();
        for worker_id in 0..self.config.pool_size {
            let pool = Arc::clone(&pool);
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let axe_source = Arc::clone(&axe_source);
            let auth = self.auth.clone();
            let config = self.config.clone();
            let cancel = cancel.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    if *cancel.borrow() {
                        break;
                    }
                    let task = { task_rx.lock().await.recv().await };
                    let Some(task) = task else { break };

                    debug!("worker {worker_id} scanning {}", task.url);
                    let result =
                        scan_with_retry(&pool, &task, &axe_source, auth.as_ref(), &config).await;
                    if result_tx.send((task, result)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let processed = AtomicUsize::new(0);
        while let Some((task, result)) = result_rx.recv().await {
            match result {
                Ok(violations) => {
                    let count = violations.len();
                    outcome.violations.extend(violations, &self.normalizer);
                    outcome.scanned_urls.push(task.url.clone());
                    visited.insert(&task.url);
                    debug!("{}: {count} violation rows", task.url);

                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % self.config.auto_save_interval.max(1) == 0 {
                        if let Err(e) = visited.save(&self.layout) {
                            warn!("visited-set save failed: {e:#}");
                        }
                    }
                }
                Err(error) => {
                    warn!("{}: {error}", task.url);
                    outcome.errors.push(StageError::new(task.url.clone(), &error));
                }
            }
        }

        feeder.abort();
        for worker in workers {
            worker.await.ok();
        }
        pool.shutdown().await;

        if let Err(e) = visited.save(&self.layout) {
            warn!("final visited-set save failed: {e:#}");
        }

        info!(
            "scan complete: {} URLs, {} violation rows, {} failures",
            outcome.scanned_urls.len(),
            outcome.violations.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Write the per-URL workbook: one sheet per scanned URL, a marker row
    /// for clean pages.
    pub fn write_workbook(&self, outcome: &ScanOutcome) -> AuditResult<PathBuf> {
        let path = self.layout.axe_workbook_path();
        let workbook = build_workbook(outcome);
        JsonWorkbookWriter
            .write(&workbook, &path)
            .map_err(|e| AuditError::Fatal(format!("writing scan workbook: {e:#}")))?;
        Ok(path)
    }
}

fn build_workbook(outcome: &ScanOutcome) -> Workbook {
    let mut by_url: BTreeMap<&str, Vec<&Violation>> = BTreeMap::new();
    for url in &outcome.scanned_urls {
        by_url.entry(url.as_str()).or_default();
    }
    for violation in outcome.violations.violations() {
        by_url
            .entry(violation.page_url.as_str())
            .or_default()
            .push(violation);
    }

    let mut workbook = Workbook::default();
    let mut namer = SheetNamer::new();
    for (url, violations) in by_url {
        let sheet_name = namer.name_for(&sheet_candidate(url));
        let rows: Vec<serde_json::Value> = if violations.is_empty() {
            vec![serde_json::json!({
                "page_url": url,
                "violation_id": "N/A",
                "impact": Impact::Unknown.as_str(),
                "description": "No issues detected",
            })]
        } else {
            violations
                .iter()
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect()
        };
        workbook.sheets.push(crate::report_io::Sheet {
            name: sheet_name,
            rows,
        });
    }
    workbook
}

/// `domain_lastsegment` in the manner of spreadsheet tab names.
fn sheet_candidate(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let domain = parsed
                .host_str()
                .unwrap_or("file")
                .trim_start_matches("www.");
            let last_segment = parsed
                .path()
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("home");
            format!("{domain}_{last_segment}")
        }
        Err(_) => "sheet".to_string(),
    }
}

/// One scan attempt plus a single retry after driver death.
async fn scan_with_retry(
    pool: &Arc<DriverPool>,
    task: &ScanTask,
    axe_source: &str,
    auth: Option<&AuthSession>,
    config: &ScannerConfig,
) -> Result<Vec<Violation>, AuditError> {
    match scan_once(pool, task, axe_source, auth, config).await {
        Err(AuditError::DriverFailure(msg)) => {
            warn!("{}: driver failure ({msg}), retrying once", task.url);
            scan_once(pool, task, axe_source, auth, config).await
        }
        other => other,
    }
}

async fn scan_once(
    pool: &Arc<DriverPool>,
    task: &ScanTask,
    axe_source: &str,
    auth: Option<&AuthSession>,
    config: &ScannerConfig,
) -> Result<Vec<Violation>, AuditError> {
    let guard = pool
        .acquire()
        .await
        .map_err(|e| AuditError::DriverFailure(format!("acquiring driver: {e:#}")))?;

    let page = match guard.browser().new_page("about:blank").await {
        Ok(page) => page,
        Err(e) => {
            let error = AuditError::DriverFailure(format!("new page: {e}"));
            guard.discard();
            return Err(error);
        }
    };

    let result = scan_on_page(&page, task, axe_source, auth, config).await;
    page.close().await.ok();

    if let Err(AuditError::DriverFailure(_)) = &result {
        guard.discard();
    }
    result
}

async fn scan_on_page(
    page: &chromiumoxide::Page,
    task: &ScanTask,
    axe_source: &str,
    auth: Option<&AuthSession>,
    config: &ScannerConfig,
) -> Result<Vec<Violation>, AuditError> {
    let auth_applied = match auth {
        Some(session) if task.auth_required && session.authenticated => {
            // Cookies need an origin; land on the site root first.
            if let Ok(parsed) = url::Url::parse(&task.url) {
                let origin = format!(
                    "{}://{}/",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or_default()
                );
                page.goto(origin.as_str()).await.ok();
                page.wait_for_navigation().await.ok();
            }
            session
                .apply_to_page(page)
                .await
                .map_err(|e| AuditError::DriverFailure(format!("applying auth: {e:#}")))?;

            // HTTP Basic rides on every outbound request from this page.
            let extra = session.apply_to_headers(&task.url, std::collections::HashMap::new());
            if !extra.is_empty() {
                use chromiumoxide::cdp::browser_protocol::network::{
                    Headers, SetExtraHttpHeadersParams,
                };
                let map: serde_json::Map<String, serde_json::Value> = extra
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                    serde_json::Value::Object(map),
                )))
                .await
                .ok();
            }
            true
        }
        _ => false,
    };

    if task.auth_required && !auth_applied {
        return Err(AuditError::AccessDenied(format!(
            "{} requires auth but no session is available",
            task.url
        )));
    }

    let load_timeout = Duration::from_secs(config.page_load_timeout_secs);
    tokio::time::timeout(load_timeout, page.goto(task.url.as_str()))
        .await
        .map_err(|_| AuditError::Transient(format!("{}: page load timeout", task.url)))?
        .map_err(|e| AuditError::DriverFailure(format!("{}: {e}", task.url)))?;
    if tokio::time::timeout(load_timeout, page.wait_for_navigation())
        .await
        .is_err()
    {
        debug!("{}: navigation wait timed out, proceeding", task.url);
    }

    // Late scripts get a grace period before the audit runs.
    tokio::time::sleep(Duration::from_millis(config.sleep_time_ms)).await;

    // Inject axe unless a prior navigation already left it in place.
    let already_present = page
        .evaluate(AXE_PRESENT_SCRIPT)
        .await
        .ok()
        .and_then(|v| v.into_value::<bool>().ok())
        .unwrap_or(false);
    if !already_present {
        page.evaluate(axe_source)
            .await
            .map_err(|e| AuditError::DriverFailure(format!("injecting axe: {e}")))?;
    }

    // axe gets three in-page attempts before the URL is written off as
    // clean-but-unscannable.
    let script_timeout = Duration::from_secs(config.script_timeout_secs);
    let mut results = AxeResults::default();
    for attempt in 1..=3 {
        let run = tokio::time::timeout(script_timeout, page.evaluate(AXE_RUN_SCRIPT)).await;
        match run {
            Ok(Ok(evaluation)) => match evaluation.into_value::<String>() {
                Ok(raw) => match AxeResults::from_json(&raw) {
                    Ok(decoded) => {
                        results = decoded;
                        break;
                    }
                    Err(e) => warn!("{}: axe payload decode failed ({e:#})", task.url),
                },
                Err(e) => warn!("{}: axe result extraction failed ({e})", task.url),
            },
            Ok(Err(e)) => warn!("{}: axe run failed on attempt {attempt}: {e}", task.url),
            Err(_) => warn!("{}: axe run timed out on attempt {attempt}", task.url),
        }
        if attempt < 3 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    let final_url = page_ops::page_url_or_blank(page).await;
    let page_url = if final_url == "about:blank" {
        task.url.clone()
    } else {
        final_url
    };

    let mut violations = Vec::new();
    for violation in results.violations {
        let impact = violation
            .impact
            .as_deref()
            .map(Impact::parse)
            .unwrap_or(Impact::Unknown);
        for node in &violation.nodes {
            violations.push(Violation {
                page_url: page_url.clone(),
                violation_id: violation.id.clone(),
                impact,
                description: violation.description.clone(),
                help: violation.help.clone(),
                target_selector: node.target_selector(),
                html_fragment: node.html.clone(),
                failure_summary: node.failure_summary.clone().unwrap_or_default(),
                auth_required: auth_applied,
                funnel_name: task.funnel_name.clone(),
                funnel_step: task.funnel_step.clone(),
                step_number: task.step_number,
            });
        }
    }
    Ok(violations)
}
