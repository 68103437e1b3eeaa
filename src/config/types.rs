//! Core configuration types for audit runs.
//!
//! `AuditConfig` is a plain value constructed once at entry (defaults <
//! config file < `AXE_*` environment < CLI) and threaded through the
//! pipeline; stages receive only the subsets they need. There are no global
//! configuration singletons.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::funnel::FunnelDefinition;

/// Stage gate for `--start`: everything before the named stage is skipped
/// and its artifacts are loaded from the output layout instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStage {
    Crawler,
    Auth,
    Axe,
    Funnel,
    Analysis,
}

impl Default for StartStage {
    fn default() -> Self {
        Self::Crawler
    }
}

impl FromStr for StartStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crawler" | "crawl" => Ok(Self::Crawler),
            "auth" => Ok(Self::Auth),
            "axe" | "scan" | "scanner" => Ok(Self::Axe),
            "funnel" => Ok(Self::Funnel),
            "analysis" | "analyze" | "final_report" => Ok(Self::Analysis),
            other => Err(format!(
                "unknown stage '{other}' (expected crawler|auth|axe|funnel|analysis)"
            )),
        }
    }
}

impl StartStage {
    /// Ordering index used for stage gating.
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Self::Crawler => 0,
            Self::Auth => 1,
            Self::Axe => 2,
            Self::Funnel => 3,
            Self::Analysis => 4,
        }
    }
}

/// Severity weights applied to impact levels. The defaults are contractual:
/// aggregated scores are compared across runs, so changing them marks the
/// report as custom-weighted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub critical: u32,
    pub serious: u32,
    pub moderate: u32,
    pub minor: u32,
    pub unknown: u32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: 4,
            serious: 3,
            moderate: 2,
            minor: 1,
            unknown: 0,
        }
    }
}

impl SeverityWeights {
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Conformance scoring knobs. The two factors shape how fast the heuristic
/// score decays; defaults are contractual like the severity weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: SeverityWeights,
    /// Multiplier on the average severity per page.
    #[serde(default = "default_severity_weight_factor")]
    pub severity_weight_factor: f64,
    /// Multiplier on the fraction of pages with any critical violation.
    #[serde(default = "default_critical_penalty_factor")]
    pub critical_penalty_factor: f64,
}

fn default_severity_weight_factor() -> f64 {
    2.0
}

fn default_critical_penalty_factor() -> f64 {
    20.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: SeverityWeights::default(),
            severity_weight_factor: default_severity_weight_factor(),
            critical_penalty_factor: default_critical_penalty_factor(),
        }
    }
}

impl ScoringConfig {
    /// Whether any knob deviates from the contractual defaults.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        *self != Self::default()
    }
}

/// Crawler bounds and behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Per-domain page budget. Zero produces a no-op crawl with an empty
    /// state file.
    #[serde(default = "default_max_urls", alias = "CRAWLER_MAX_URLS", alias = "max_urls")]
    pub max_urls_per_domain: usize,

    /// Global page budget across all domains.
    #[serde(default = "default_max_total_urls", alias = "CRAWLER_MAX_TOTAL_URLS")]
    pub max_total_urls: usize,

    /// Maximum link depth from the seed.
    #[serde(default = "default_depth_limit", alias = "CRAWLER_DEPTH_LIMIT")]
    pub depth_limit: u8,

    /// Politeness delay between requests to the same domain, milliseconds.
    #[serde(default = "default_request_delay_ms", alias = "CRAWLER_REQUEST_DELAY_MS")]
    pub request_delay_ms: u64,

    /// Hybrid scheduling: browser rendering for the first pages of a
    /// domain, then plain HTTP once the pending queue outgrows
    /// `pending_threshold`.
    #[serde(default = "default_true", alias = "CRAWLER_HYBRID_MODE")]
    pub hybrid_mode: bool,

    /// Heavy-mode page budget per domain before the switch is considered.
    #[serde(default = "default_pending_threshold", alias = "CRAWLER_PENDING_THRESHOLD")]
    pub pending_threshold: usize,

    /// Retry budget for transient failures.
    #[serde(default = "default_retry_times", alias = "RETRY_TIMES")]
    pub retry_times: u32,

    /// Initial backoff delay, milliseconds. Doubles per attempt with
    /// jitter, capped at `retry_delay_max_ms`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_retry_delay_max_ms")]
    pub retry_delay_max_ms: u64,

    /// Global in-flight request bound.
    #[serde(default = "default_concurrent_requests", alias = "CONCURRENT_REQUESTS")]
    pub concurrent_requests: usize,

    /// Per-domain in-flight request bound.
    #[serde(
        default = "default_concurrent_per_domain",
        alias = "CONCURRENT_REQUESTS_PER_DOMAIN"
    )]
    pub concurrent_requests_per_domain: usize,

    /// Checkpoint the crawl state every N processed pages.
    #[serde(default = "default_auto_save_interval", alias = "CRAWLER_SAVE_INTERVAL")]
    pub auto_save_interval: usize,

    /// Resume from a prior state file when present.
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Abandon a domain when its error rate (errors / attempts, after a
    /// minimum number of attempts) exceeds this fraction.
    #[serde(default = "default_error_rate_threshold")]
    pub domain_error_rate_threshold: f64,

    /// Minimum attempts before the error-rate check applies.
    #[serde(default = "default_error_rate_min_attempts")]
    pub domain_error_min_attempts: u32,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout_secs: u64,

    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,
}

fn default_max_urls() -> usize {
    100
}
fn default_max_total_urls() -> usize {
    1000
}
fn default_depth_limit() -> u8 {
    5
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_pending_threshold() -> usize {
    30
}
fn default_retry_times() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_retry_delay_max_ms() -> u64 {
    60_000
}
fn default_concurrent_requests() -> usize {
    8
}
fn default_concurrent_per_domain() -> usize {
    2
}
fn default_auto_save_interval() -> usize {
    25
}
fn default_error_rate_threshold() -> f64 {
    0.5
}
fn default_error_rate_min_attempts() -> u32 {
    10
}
fn default_page_load_timeout() -> u64 {
    30
}
fn default_navigation_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_urls_per_domain: default_max_urls(),
            max_total_urls: default_max_total_urls(),
            depth_limit: default_depth_limit(),
            request_delay_ms: default_request_delay_ms(),
            hybrid_mode: true,
            pending_threshold: default_pending_threshold(),
            retry_times: default_retry_times(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_delay_max_ms: default_retry_delay_max_ms(),
            concurrent_requests: default_concurrent_requests(),
            concurrent_requests_per_domain: default_concurrent_per_domain(),
            auto_save_interval: default_auto_save_interval(),
            resume: true,
            domain_error_rate_threshold: default_error_rate_threshold(),
            domain_error_min_attempts: default_error_rate_min_attempts(),
            headless: true,
            page_load_timeout_secs: default_page_load_timeout(),
            navigation_timeout_secs: default_navigation_timeout(),
        }
    }
}

/// Scanner pool and axe execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Number of concurrent browser workers.
    #[serde(default = "default_pool_size", alias = "POOL_SIZE")]
    pub pool_size: usize,

    /// Settle time after page load before injecting axe, milliseconds.
    #[serde(default = "default_sleep_time_ms", alias = "SLEEP_TIME_MS")]
    pub sleep_time_ms: u64,

    /// Persist the visited set every N processed URLs.
    #[serde(default = "default_scan_save_interval", alias = "AUTO_SAVE_INTERVAL")]
    pub auto_save_interval: usize,

    /// Skip URLs recorded in the visited file from a prior run.
    #[serde(default = "default_true")]
    pub resume: bool,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout_secs: u64,

    /// Budget for the in-page axe run itself.
    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,

    /// Local axe-core script. When unset the pinned CDN copy is downloaded
    /// once and cached under the domain's temp directory.
    #[serde(default)]
    pub axe_script_path: Option<PathBuf>,

    /// Cap on representative URLs taken per domain (largest clusters
    /// first). `None` scans one representative per discovered template.
    #[serde(default, alias = "MAX_TEMPLATES_PER_DOMAIN")]
    pub max_templates_per_domain: Option<usize>,
}

fn default_pool_size() -> usize {
    5
}
fn default_sleep_time_ms() -> u64 {
    1000
}
fn default_scan_save_interval() -> usize {
    5
}
fn default_script_timeout() -> u64 {
    30
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            sleep_time_ms: default_sleep_time_ms(),
            auto_save_interval: default_scan_save_interval(),
            resume: true,
            headless: true,
            page_load_timeout_secs: default_page_load_timeout(),
            script_timeout_secs: default_script_timeout(),
            axe_script_path: None,
            max_templates_per_domain: None,
        }
    }
}

/// Resource monitor thresholds. When CPU or memory exceeds a threshold the
/// orchestrator pauses scheduling for the cool-down period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cpu_threshold", alias = "CPU_THRESHOLD")]
    pub cpu_threshold: f32,
    #[serde(default = "default_memory_threshold", alias = "MEMORY_THRESHOLD")]
    pub memory_threshold: f32,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_cool_down")]
    pub cool_down_secs: u64,
}

fn default_cpu_threshold() -> f32 {
    90.0
}
fn default_memory_threshold() -> f32 {
    85.0
}
fn default_check_interval() -> u64 {
    3
}
fn default_cool_down() -> u64 {
    7
}

impl Default for ResourceMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            check_interval_secs: default_check_interval(),
            cool_down_secs: default_cool_down(),
        }
    }
}

/// Mail dispatch settings; the mailer itself is an external collaborator
/// invoked with report paths after the pipeline returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

/// Enumerated auth strategies; unknown names are a config error at load
/// time, not at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategyKind {
    FormLogin,
    HttpBasic,
}

/// Form-login and HTTP Basic settings for one domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthDomainConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Strategy priority list; the first one that succeeds wins.
    #[serde(default)]
    pub strategies: Vec<AuthStrategyKind>,

    #[serde(default, alias = "AUTH_LOGIN_URL")]
    pub login_url: Option<String>,
    #[serde(default, alias = "AUTH_USERNAME")]
    pub username: Option<String>,
    #[serde(default, alias = "AUTH_PASSWORD")]
    pub password: Option<String>,

    #[serde(default = "default_username_selector")]
    pub username_selector: String,
    #[serde(default = "default_password_selector")]
    pub password_selector: String,
    #[serde(default = "default_submit_selector")]
    pub submit_selector: String,

    /// Element that must be present after a successful login.
    #[serde(default)]
    pub success_indicator: Option<String>,
    /// Element that must be absent after a successful login.
    #[serde(default)]
    pub error_indicator: Option<String>,

    #[serde(default = "default_auth_wait")]
    pub wait_time_secs: u64,

    #[serde(default)]
    pub pre_login_actions: Vec<crate::funnel::Action>,
    #[serde(default)]
    pub post_login_actions: Vec<crate::funnel::Action>,

    #[serde(default, alias = "AUTH_BASIC_USERNAME")]
    pub basic_username: Option<String>,
    #[serde(default, alias = "AUTH_BASIC_PASSWORD")]
    pub basic_password: Option<String>,

    /// A URL is restricted iff it starts with any prefix or matches any
    /// pattern below.
    #[serde(default, alias = "RESTRICTED_URLS")]
    pub restricted_url_prefixes: Vec<String>,
    #[serde(default)]
    pub restricted_url_patterns: Vec<String>,
}

fn default_username_selector() -> String {
    "input[name='username'], input[type='email']".to_string()
}
fn default_password_selector() -> String {
    "input[type='password']".to_string()
}
fn default_submit_selector() -> String {
    "button[type='submit'], input[type='submit']".to_string()
}
fn default_auth_wait() -> u64 {
    10
}

/// Top-level configuration value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Target domains (bare hosts or URLs; normalized to hosts).
    #[serde(default, alias = "BASE_URLS", alias = "DOMAINS")]
    pub domains: Vec<String>,

    #[serde(default = "default_output_root", alias = "OUTPUT_DIR")]
    pub output_root: PathBuf,

    #[serde(default = "default_log_level", alias = "LOG_LEVEL")]
    pub log_level: String,

    #[serde(default, alias = "START_STAGE")]
    pub start_stage: StartStage,

    /// Strip `www.` during URL normalization.
    #[serde(default = "default_true")]
    pub strip_www: bool,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Per-domain auth settings keyed by host; the `"default"` entry
    /// applies to domains without their own.
    #[serde(default)]
    pub auth: BTreeMap<String, AuthDomainConfig>,

    #[serde(default)]
    pub funnels: Vec<FunnelDefinition>,

    #[serde(default = "default_true", alias = "FUNNEL_ANALYSIS_ENABLED")]
    pub funnel_analysis_enabled: bool,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub resource_monitor: ResourceMonitorConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./output")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            output_root: default_output_root(),
            log_level: default_log_level(),
            start_stage: StartStage::default(),
            strip_www: true,
            crawler: CrawlerConfig::default(),
            scanner: ScannerConfig::default(),
            auth: BTreeMap::new(),
            funnels: Vec::new(),
            funnel_analysis_enabled: true,
            scoring: ScoringConfig::default(),
            resource_monitor: ResourceMonitorConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

impl AuditConfig {
    /// Auth settings for one domain, falling back to the `"default"` entry.
    #[must_use]
    pub fn auth_for_domain(&self, domain: &str) -> Option<&AuthDomainConfig> {
        self.auth.get(domain).or_else(|| self.auth.get("default"))
    }

    /// Funnels applicable to a domain: domain-scoped ones plus global ones.
    #[must_use]
    pub fn funnels_for_domain(&self, domain: &str) -> Vec<&FunnelDefinition> {
        self.funnels
            .iter()
            .filter(|f| f.domain.as_deref().map_or(true, |d| d == domain))
            .collect()
    }

    /// Validate the cross-field requirements that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.domains.is_empty() {
            return Err("no target domains configured".to_string());
        }
        if self.scanner.pool_size == 0 {
            return Err("scanner.pool_size must be at least 1".to_string());
        }
        if self.crawler.concurrent_requests == 0 {
            return Err("crawler.concurrent_requests must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.crawler.domain_error_rate_threshold) {
            return Err("crawler.domain_error_rate_threshold must be in [0, 1]".to_string());
        }
        for (domain, auth) in &self.auth {
            if auth.enabled
                && auth.strategies.contains(&AuthStrategyKind::FormLogin)
                && auth.login_url.is_none()
            {
                return Err(format!(
                    "auth.{domain}: form_login strategy requires login_url"
                ));
            }
        }
        for funnel in &self.funnels {
            if funnel.steps.is_empty() {
                return Err(format!("funnel '{}' has no steps", funnel.id));
            }
        }
        Ok(())
    }
}
