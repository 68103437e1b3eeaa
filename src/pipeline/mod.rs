//! Pipeline orchestration: stage gating, partial-failure policy, resource
//! governance and artifact hand-off.
//!
//! Stages communicate through paths, never in-memory handles: the crawler
//! leaves a state file, the scanner a workbook, the funnel executor its
//! `results.json`, and every stage can be re-entered from those artifacts
//! via `--start`. A stage failure degrades its domain; only `Fatal` errors
//! abort the run.

mod monitor;

pub use monitor::{spawn_monitor, PauseGate};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::analyzer::AccessibilityAnalyzer;
use crate::auth::{AuthDriver, AuthSession};
use crate::config::{AuditConfig, StartStage};
use crate::crawler::{CrawlState, SiteCrawler};
use crate::error::{AuditError, AuditResult, StageError};
use crate::funnel::{FunnelArtifacts, FunnelExecutor};
use crate::output::{archive_previous_run, Component, OutputLayout};
use crate::report_io::{
    ChartRenderer, DescriptorChartRenderer, JsonWorkbookWriter, LogMailer, Mailer, Workbook,
    WorkbookWriter,
};
use crate::scanner::{AxeScanner, ScanTask, Violation, ViolationSet};
use crate::urlnorm::UrlNormalizer;

/// The structured result of one stage.
#[derive(Debug, Default)]
pub struct StageOutcome {
    pub ok: bool,
    pub artifacts: Vec<PathBuf>,
    pub errors: Vec<StageError>,
}

impl StageOutcome {
    fn success(artifacts: Vec<PathBuf>, errors: Vec<StageError>) -> Self {
        Self {
            ok: true,
            artifacts,
            errors,
        }
    }

    fn failure(error: StageError) -> Self {
        Self {
            ok: false,
            artifacts: Vec::new(),
            errors: vec![error],
        }
    }
}

/// Per-domain run record for the summary log.
#[derive(Debug, Default)]
pub struct DomainRunSummary {
    pub domain: String,
    pub degraded: bool,
    pub degraded_reasons: Vec<String>,
    pub report_path: Option<PathBuf>,
    pub stages: BTreeMap<&'static str, StageOutcome>,
}

impl DomainRunSummary {
    fn record(&mut self, stage: &'static str, outcome: StageOutcome) {
        if !outcome.ok {
            self.degraded = true;
            for error in &outcome.errors {
                self.degraded_reasons
                    .push(format!("{stage}: {}", error.message));
            }
        }
        self.stages.insert(stage, outcome);
    }
}

/// The whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub domains: Vec<DomainRunSummary>,
    pub report_paths: Vec<PathBuf>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Contractual exit codes: 0 with at least one report, 1 with none,
    /// 130 on interrupt. (2 is reserved for fatal setup errors, raised
    /// before a summary exists.)
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            130
        } else if self.report_paths.is_empty() {
            1
        } else {
            0
        }
    }
}

pub struct AuditPipeline {
    config: AuditConfig,
}

impl AuditPipeline {
    #[must_use]
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    /// Run all configured domains, sequentially, under the resource
    /// monitor. `cancel` flips true on SIGINT/SIGTERM.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> AuditResult<RunSummary> {
        let (monitor_shutdown_tx, monitor_shutdown_rx) = watch::channel(false);
        let (pause_gate, monitor_handle) =
            spawn_monitor(self.config.resource_monitor.clone(), monitor_shutdown_rx);

        let mut summary = RunSummary::default();

        for domain in &self.config.domains {
            if *cancel.borrow() {
                summary.cancelled = true;
                break;
            }
            pause_gate.wait_until_clear().await;

            info!("=== auditing {domain} ===");
            let domain_summary = match self
                .run_domain(domain, cancel.clone(), &pause_gate)
                .await
            {
                Ok(domain_summary) => domain_summary,
                Err(AuditError::Fatal(msg)) => {
                    // Fatal aborts everything.
                    let _ = monitor_shutdown_tx.send(true);
                    if let Some(handle) = monitor_handle {
                        handle.await.ok();
                    }
                    return Err(AuditError::Fatal(msg));
                }
                Err(other) => {
                    error!("{domain}: {other}");
                    let mut failed = DomainRunSummary {
                        domain: domain.clone(),
                        degraded: true,
                        ..DomainRunSummary::default()
                    };
                    failed.degraded_reasons.push(other.to_string());
                    failed
                }
            };

            if let Some(path) = &domain_summary.report_path {
                summary.report_paths.push(path.clone());
            }
            summary.domains.push(domain_summary);

            if *cancel.borrow() {
                summary.cancelled = true;
            }
        }

        let _ = monitor_shutdown_tx.send(true);
        if let Some(handle) = monitor_handle {
            handle.await.ok();
        }

        self.dispatch_mail(&summary);
        self.log_summary(&summary);
        Ok(summary)
    }

    async fn run_domain(
        &self,
        domain: &str,
        cancel: watch::Receiver<bool>,
        pause_gate: &PauseGate,
    ) -> AuditResult<DomainRunSummary> {
        let mut summary = DomainRunSummary {
            domain: domain.to_string(),
            ..DomainRunSummary::default()
        };
        let start = self.config.start_stage;

        // A fresh crawl (no resume) owns the output directory; anything
        // older moves under runs/. Re-entrant starts keep prior artifacts
        // in place because they are this run's inputs.
        if start == StartStage::Crawler && !self.config.crawler.resume {
            archive_previous_run(&self.config.output_root, domain)
                .map_err(|e| AuditError::Fatal(format!("archiving previous run: {e:#}")))?;
        }

        let layout = OutputLayout::create(&self.config.output_root, domain)
            .map_err(|e| AuditError::Fatal(format!("creating output layout: {e:#}")))?;

        // --- Stage: crawler ---
        let mut crawl_state: Option<CrawlState> = None;
        if start.index() <= StartStage::Crawler.index() {
            pause_gate.wait_until_clear().await;
            match self.crawl_stage(domain, cancel.clone()).await {
                Ok((state, errors, cancelled)) => {
                    summary.record(
                        "crawler",
                        StageOutcome::success(vec![layout.crawler_state_path()], errors),
                    );
                    crawl_state = Some(state);
                    if cancelled {
                        return Ok(summary);
                    }
                }
                Err(e) => {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    summary.record("crawler", StageOutcome::failure(StageError::new(domain, &e)));
                }
            }
        } else {
            let path = layout.crawler_state_path();
            if path.exists() {
                crawl_state = Some(CrawlState::load_or_default(&path));
            } else {
                info!("{domain}: no crawl state on disk, template projection unavailable");
            }
        }
        if *cancel.borrow() {
            return Ok(summary);
        }

        // --- Stage: auth ---
        // The session is a value consumed by the scanner and funnels, so it
        // is produced whenever any consumer stage runs.
        let mut auth_session: Option<AuthSession> = None;
        if start.index() <= StartStage::Funnel.index() {
            if let Some(auth_config) = self.config.auth_for_domain(domain) {
                if auth_config.enabled {
                    pause_gate.wait_until_clear().await;
                    let driver = AuthDriver::new(domain, auth_config.clone());
                    let session = driver.login(self.config.scanner.headless).await;
                    let outcome = if session.authenticated {
                        StageOutcome::success(Vec::new(), Vec::new())
                    } else {
                        StageOutcome::failure(StageError::new(
                            domain,
                            &AuditError::AccessDenied("authentication failed".to_string()),
                        ))
                    };
                    summary.record("auth", outcome);
                    auth_session = Some(session);
                }
            }
        }
        if *cancel.borrow() {
            return Ok(summary);
        }

        // --- Stage: axe ---
        let scanner = AxeScanner::new(
            self.config.scanner.clone(),
            layout.clone(),
            self.config.strip_www,
            auth_session.clone(),
        );

        let mut violations = ViolationSet::new();
        let mut scanned_urls: Vec<String> = Vec::new();
        let normalizer = UrlNormalizer::new(self.config.strip_www);

        if start.index() <= StartStage::Axe.index() {
            pause_gate.wait_until_clear().await;
            let tasks = self.scan_tasks(domain, crawl_state.as_ref(), auth_session.as_ref());
            match scanner.scan(tasks, cancel.clone()).await {
                Ok(outcome) => {
                    scanned_urls.extend(outcome.scanned_urls.iter().cloned());
                    let errors = outcome.errors.clone();
                    violations.extend(outcome.violations.into_violations(), &normalizer);

                    let workbook_outcome = crate::scanner::ScanOutcome {
                        violations: violations.clone(),
                        scanned_urls: scanned_urls.clone(),
                        errors: Vec::new(),
                    };
                    let mut artifacts = Vec::new();
                    match scanner.write_workbook(&workbook_outcome) {
                        Ok(path) => artifacts.push(path),
                        Err(e) => warn!("{domain}: workbook write failed: {e}"),
                    }
                    summary.record("axe", StageOutcome::success(artifacts, errors));
                }
                Err(e) => {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    summary.record("axe", StageOutcome::failure(StageError::new(domain, &e)));
                }
            }
        } else {
            // Re-entry: the prior workbook is this stage's artifact.
            match load_violations_from_workbook(&layout) {
                Ok((loaded, urls)) => {
                    violations.extend(loaded, &normalizer);
                    scanned_urls = urls;
                    info!(
                        "{domain}: loaded {} violation rows from prior workbook",
                        violations.len()
                    );
                }
                Err(e) => {
                    warn!("{domain}: could not load prior workbook: {e}");
                    summary.record(
                        "axe",
                        StageOutcome::failure(StageError::new(
                            domain,
                            &AuditError::StateCorruption(e.to_string()),
                        )),
                    );
                }
            }
        }
        if *cancel.borrow() {
            return Ok(summary);
        }

        // --- Stage: funnel ---
        let mut funnel_runs: Vec<FunnelArtifacts> = Vec::new();
        if self.config.funnel_analysis_enabled {
            if start.index() <= StartStage::Funnel.index() {
                let funnels = self.config.funnels_for_domain(domain);
                if !funnels.is_empty() {
                    pause_gate.wait_until_clear().await;
                    let mut errors = Vec::new();
                    let mut artifacts = Vec::new();
                    for funnel in funnels {
                        if *cancel.borrow() {
                            break;
                        }
                        let executor = FunnelExecutor::new(
                            &layout,
                            auth_session.as_ref(),
                            self.config.scanner.headless,
                        );
                        match executor.run(funnel).await {
                            Ok(run) => {
                                artifacts.push(layout.funnel_dir(&funnel.id).join("results.json"));
                                funnel_runs.push(run);
                            }
                            Err(e) => {
                                let error =
                                    AuditError::DriverFailure(format!("funnel '{}': {e:#}", funnel.id));
                                warn!("{domain}: {error}");
                                errors.push(StageError::new(funnel.id.clone(), &error));
                            }
                        }
                    }

                    // Second scanner pass over the captured snapshots.
                    if !funnel_runs.is_empty() && !*cancel.borrow() {
                        let funnel_tasks = ScanTask::for_funnels(&funnel_runs);
                        if !funnel_tasks.is_empty() {
                            match scanner.scan(funnel_tasks, cancel.clone()).await {
                                Ok(outcome) => {
                                    scanned_urls.extend(outcome.scanned_urls.iter().cloned());
                                    errors.extend(outcome.errors);
                                    violations
                                        .extend(outcome.violations.into_violations(), &normalizer);
                                    let workbook_outcome = crate::scanner::ScanOutcome {
                                        violations: violations.clone(),
                                        scanned_urls: scanned_urls.clone(),
                                        errors: Vec::new(),
                                    };
                                    if let Err(e) = scanner.write_workbook(&workbook_outcome) {
                                        warn!("{domain}: workbook rewrite failed: {e}");
                                    }
                                }
                                Err(e) => errors.push(StageError::new(domain, &e)),
                            }
                        }
                    }

                    let ok = errors.is_empty() || !funnel_runs.is_empty();
                    let mut outcome = StageOutcome::success(artifacts, errors);
                    outcome.ok = ok;
                    summary.record("funnel", outcome);
                }
            } else {
                funnel_runs = load_funnel_results(&layout);
                if !funnel_runs.is_empty() {
                    info!("{domain}: loaded {} prior funnel run(s)", funnel_runs.len());
                }
            }
        }
        if *cancel.borrow() {
            return Ok(summary);
        }

        // --- Stage: analysis ---
        pause_gate.wait_until_clear().await;
        let multipliers: BTreeMap<String, f64> = self
            .config
            .funnels
            .iter()
            .map(|f| (f.id.clone(), f.severity_multiplier))
            .collect();
        let analyzer = AccessibilityAnalyzer::new(self.config.scoring.clone(), self.config.strip_www)
            .with_funnel_multipliers(multipliers);

        // A crawl state that learned nothing contributes nothing.
        let crawl_for_analysis = crawl_state
            .as_ref()
            .filter(|state| state.total_templates() > 0);

        let report = analyzer.analyze(
            domain,
            violations.violations(),
            crawl_for_analysis,
            &funnel_runs,
        );

        let report_path = layout.report_path();
        let mut analysis_artifacts = Vec::new();
        let mut analysis_errors = Vec::new();
        match report.to_workbook() {
            Ok(workbook) => match JsonWorkbookWriter.write(&workbook, &report_path) {
                Ok(()) => {
                    analysis_artifacts.push(report_path.clone());
                    summary.report_path = Some(report_path);
                }
                Err(e) => analysis_errors.push(StageError::new(
                    domain,
                    &AuditError::Fatal(format!("writing report: {e:#}")),
                )),
            },
            Err(e) => analysis_errors.push(StageError::new(
                domain,
                &AuditError::InvalidInput(format!("assembling workbook: {e:#}")),
            )),
        }

        let chart_dir = layout.component_dir(Component::Charts);
        match DescriptorChartRenderer.render(&report.charts, &chart_dir) {
            Ok(written) => {
                analysis_artifacts.extend(written.into_values());
            }
            Err(e) => warn!("{domain}: chart rendering failed: {e:#}"),
        }

        let ok = analysis_errors.is_empty();
        let mut outcome = StageOutcome::success(analysis_artifacts, analysis_errors);
        outcome.ok = ok;
        summary.record("analysis", outcome);

        Ok(summary)
    }

    async fn crawl_stage(
        &self,
        domain: &str,
        cancel: watch::Receiver<bool>,
    ) -> AuditResult<(CrawlState, Vec<StageError>, bool)> {
        let mut extra_headers = BTreeMap::new();
        if let Some(auth) = self.config.auth_for_domain(domain) {
            if let (Some(user), Some(pass)) = (&auth.basic_username, &auth.basic_password) {
                let mut headers = HashMap::new();
                headers.insert(
                    "Authorization".to_string(),
                    crate::auth::basic_authorization(user, pass),
                );
                extra_headers.insert(domain.to_string(), headers);
            }
        }

        let crawler = SiteCrawler::new(
            vec![domain.to_string()],
            self.config.crawler.clone(),
            self.config.strip_www,
            &self.config.output_root,
        )?
        .with_extra_headers(extra_headers);

        let outcome = crawler.run(cancel).await?;
        Ok((outcome.state, outcome.errors, outcome.cancelled))
    }

    /// Scan targets: representative URLs from the crawl (or the seed when
    /// no state exists) plus configured restricted URLs.
    fn scan_tasks(
        &self,
        domain: &str,
        crawl_state: Option<&CrawlState>,
        auth: Option<&AuthSession>,
    ) -> Vec<ScanTask> {
        let mut tasks = Vec::new();

        let mut from_crawl = false;
        if let Some(state) = crawl_state {
            if let Some(domain_state) = state.domain(domain) {
                for url in
                    domain_state.representative_urls(self.config.scanner.max_templates_per_domain)
                {
                    tasks.push(ScanTask::page(url.as_str()));
                    from_crawl = true;
                }
            }
        }
        if !from_crawl {
            tasks.push(ScanTask::page(format!("https://{domain}")));
        }

        if let Some(session) = auth {
            for prefix in session.restricted().prefixes() {
                tasks.push(ScanTask {
                    url: prefix.clone(),
                    auth_required: true,
                    funnel_name: None,
                    funnel_step: None,
                    step_number: None,
                });
            }
        }
        tasks
    }

    fn dispatch_mail(&self, summary: &RunSummary) {
        if !self.config.email.enabled || summary.report_paths.is_empty() {
            return;
        }
        let subject = format!(
            "{} accessibility audit: {} report(s)",
            self.config.email.subject_prefix.as_deref().unwrap_or("axe-audit"),
            summary.report_paths.len()
        );
        if let Err(e) =
            LogMailer.send_report(&self.config.email.recipients, &subject, &summary.report_paths)
        {
            warn!("mail dispatch failed: {e:#}");
        }
    }

    fn log_summary(&self, summary: &RunSummary) {
        info!(
            "run complete: {} domain(s), {} report(s){}",
            summary.domains.len(),
            summary.report_paths.len(),
            if summary.cancelled { " [interrupted]" } else { "" }
        );
        for domain in &summary.domains {
            if domain.degraded {
                warn!(
                    "{}: degraded ({})",
                    domain.domain,
                    domain.degraded_reasons.join("; ")
                );
            }
        }
    }
}

/// Read violations and scanned URLs back from the scanner workbook.
fn load_violations_from_workbook(
    layout: &OutputLayout,
) -> anyhow::Result<(Vec<Violation>, Vec<String>)> {
    let path = layout.axe_workbook_path();
    let body = std::fs::read_to_string(&path)?;
    let workbook: Workbook = serde_json::from_str(&body)?;

    let mut violations = Vec::new();
    let mut urls = std::collections::BTreeSet::new();
    for sheet in &workbook.sheets {
        for row in &sheet.rows {
            if row.get("violation_id").and_then(|v| v.as_str()) == Some("N/A") {
                // Clean-page marker row; the page still counts as scanned.
                if let Some(url) = row.get("page_url").and_then(|v| v.as_str()) {
                    urls.insert(url.to_string());
                }
                continue;
            }
            if let Ok(violation) = serde_json::from_value::<Violation>(row.clone()) {
                urls.insert(violation.page_url.clone());
                violations.push(violation);
            }
        }
    }
    Ok((violations, urls.into_iter().collect()))
}

/// Collect prior `results.json` files under the funnels directory.
fn load_funnel_results(layout: &OutputLayout) -> Vec<FunnelArtifacts> {
    let funnels_dir = layout.component_dir(Component::Funnels);
    let Ok(entries) = std::fs::read_dir(&funnels_dir) else {
        return Vec::new();
    };
    let mut runs = Vec::new();
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    for dir in dirs {
        let results = dir.join("results.json");
        if !results.exists() {
            continue;
        }
        match std::fs::read_to_string(&results)
            .map_err(anyhow::Error::from)
            .and_then(|body| serde_json::from_str::<FunnelArtifacts>(&body).map_err(Into::into))
        {
            Ok(run) => runs.push(run),
            Err(e) => warn!("unreadable funnel results {}: {e:#}", results.display()),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_contract() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.exit_code(), 1);

        summary.report_paths.push(PathBuf::from("/tmp/report.json"));
        assert_eq!(summary.exit_code(), 0);

        summary.cancelled = true;
        assert_eq!(summary.exit_code(), 130);
    }

    #[test]
    fn degraded_stage_marks_domain() {
        let mut summary = DomainRunSummary::default();
        summary.record("crawler", StageOutcome::success(Vec::new(), Vec::new()));
        assert!(!summary.degraded);
        summary.record(
            "axe",
            StageOutcome::failure(StageError::new(
                "e.test",
                &AuditError::DriverFailure("boom".into()),
            )),
        );
        assert!(summary.degraded);
        assert_eq!(summary.degraded_reasons.len(), 1);
    }
}
