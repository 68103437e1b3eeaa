//! `AXE_*` environment overlay.
//!
//! Environment variables sit between the config file and CLI flags in the
//! precedence chain. The alias table below is the documented mapping; both
//! the canonical name and its aliases are honored, canonical name winning
//! when several are set.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use super::types::{AuditConfig, AuthDomainConfig, AuthStrategyKind, StartStage};

/// Documented variable → field mapping. First name in each group is
/// canonical; the rest are accepted aliases.
pub const ENV_ALIAS_TABLE: &[(&str, &[&str])] = &[
    ("AXE_OUTPUT_DIR", &["AXE_OUTPUT_ROOT"]),
    ("AXE_LOG_LEVEL", &[]),
    ("AXE_BASE_URLS", &["AXE_DOMAINS"]),
    ("AXE_START_STAGE", &["AXE_START"]),
    ("AXE_CRAWLER_MAX_URLS", &["AXE_MAX_URLS_PER_DOMAIN"]),
    ("AXE_CRAWLER_MAX_TOTAL_URLS", &[]),
    ("AXE_CRAWLER_DEPTH_LIMIT", &[]),
    ("AXE_CRAWLER_HYBRID_MODE", &["AXE_HYBRID_MODE"]),
    ("AXE_CRAWLER_PENDING_THRESHOLD", &["AXE_SELENIUM_THRESHOLD"]),
    ("AXE_CRAWLER_REQUEST_DELAY_MS", &[]),
    ("AXE_POOL_SIZE", &["AXE_SCANNER_POOL_SIZE"]),
    ("AXE_SLEEP_TIME_MS", &[]),
    ("AXE_HEADLESS", &[]),
    ("AXE_RESUME", &[]),
    ("AXE_AUTH_ENABLED", &[]),
    ("AXE_AUTH_LOGIN_URL", &[]),
    ("AXE_AUTH_USERNAME", &[]),
    ("AXE_AUTH_PASSWORD", &[]),
    ("AXE_AUTH_BASIC_USERNAME", &[]),
    ("AXE_AUTH_BASIC_PASSWORD", &[]),
    ("AXE_AUTH_RESTRICTED_URLS", &[]),
    ("AXE_FUNNEL_ANALYSIS_ENABLED", &[]),
    ("AXE_CPU_THRESHOLD", &[]),
    ("AXE_MEMORY_THRESHOLD", &[]),
];

fn lookup(canonical: &str) -> Option<String> {
    if let Ok(value) = env::var(canonical) {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }
    for (name, aliases) in ENV_ALIAS_TABLE {
        if *name == canonical {
            for alias in *aliases {
                if let Ok(value) = env::var(alias) {
                    if !value.trim().is_empty() {
                        return Some(value);
                    }
                }
            }
        }
    }
    None
}

fn parse_or_warn<T: FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring {name}='{value}': not a valid value");
            None
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("ignoring {name}='{other}': expected a boolean");
            None
        }
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Overlay every recognized `AXE_*` variable onto `config`, in place.
pub fn apply_env_overlay(config: &mut AuditConfig) {
    if let Some(v) = lookup("AXE_OUTPUT_DIR") {
        config.output_root = PathBuf::from(v);
    }
    if let Some(v) = lookup("AXE_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = lookup("AXE_BASE_URLS") {
        let domains = split_csv(&v);
        if !domains.is_empty() {
            config.domains = domains;
        }
    }
    if let Some(v) = lookup("AXE_START_STAGE") {
        if let Some(stage) = parse_or_warn::<StartStage>("AXE_START_STAGE", &v) {
            config.start_stage = stage;
        }
    }

    if let Some(v) = lookup("AXE_CRAWLER_MAX_URLS") {
        if let Some(n) = parse_or_warn("AXE_CRAWLER_MAX_URLS", &v) {
            config.crawler.max_urls_per_domain = n;
        }
    }
    if let Some(v) = lookup("AXE_CRAWLER_MAX_TOTAL_URLS") {
        if let Some(n) = parse_or_warn("AXE_CRAWLER_MAX_TOTAL_URLS", &v) {
            config.crawler.max_total_urls = n;
        }
    }
    if let Some(v) = lookup("AXE_CRAWLER_DEPTH_LIMIT") {
        if let Some(n) = parse_or_warn("AXE_CRAWLER_DEPTH_LIMIT", &v) {
            config.crawler.depth_limit = n;
        }
    }
    if let Some(v) = lookup("AXE_CRAWLER_HYBRID_MODE") {
        if let Some(b) = parse_bool("AXE_CRAWLER_HYBRID_MODE", &v) {
            config.crawler.hybrid_mode = b;
        }
    }
    if let Some(v) = lookup("AXE_CRAWLER_PENDING_THRESHOLD") {
        if let Some(n) = parse_or_warn("AXE_CRAWLER_PENDING_THRESHOLD", &v) {
            config.crawler.pending_threshold = n;
        }
    }
    if let Some(v) = lookup("AXE_CRAWLER_REQUEST_DELAY_MS") {
        if let Some(n) = parse_or_warn("AXE_CRAWLER_REQUEST_DELAY_MS", &v) {
            config.crawler.request_delay_ms = n;
        }
    }

    if let Some(v) = lookup("AXE_POOL_SIZE") {
        if let Some(n) = parse_or_warn("AXE_POOL_SIZE", &v) {
            config.scanner.pool_size = n;
        }
    }
    if let Some(v) = lookup("AXE_SLEEP_TIME_MS") {
        if let Some(n) = parse_or_warn("AXE_SLEEP_TIME_MS", &v) {
            config.scanner.sleep_time_ms = n;
        }
    }
    if let Some(v) = lookup("AXE_HEADLESS") {
        if let Some(b) = parse_bool("AXE_HEADLESS", &v) {
            config.crawler.headless = b;
            config.scanner.headless = b;
        }
    }
    if let Some(v) = lookup("AXE_RESUME") {
        if let Some(b) = parse_bool("AXE_RESUME", &v) {
            config.crawler.resume = b;
            config.scanner.resume = b;
        }
    }

    apply_auth_env(config);

    if let Some(v) = lookup("AXE_FUNNEL_ANALYSIS_ENABLED") {
        if let Some(b) = parse_bool("AXE_FUNNEL_ANALYSIS_ENABLED", &v) {
            config.funnel_analysis_enabled = b;
        }
    }
    if let Some(v) = lookup("AXE_CPU_THRESHOLD") {
        if let Some(n) = parse_or_warn("AXE_CPU_THRESHOLD", &v) {
            config.resource_monitor.cpu_threshold = n;
        }
    }
    if let Some(v) = lookup("AXE_MEMORY_THRESHOLD") {
        if let Some(n) = parse_or_warn("AXE_MEMORY_THRESHOLD", &v) {
            config.resource_monitor.memory_threshold = n;
        }
    }
}

/// `AXE_AUTH_*` variables populate (or create) the `"default"` auth entry.
fn apply_auth_env(config: &mut AuditConfig) {
    let has_auth_env = [
        "AXE_AUTH_ENABLED",
        "AXE_AUTH_LOGIN_URL",
        "AXE_AUTH_USERNAME",
        "AXE_AUTH_PASSWORD",
        "AXE_AUTH_BASIC_USERNAME",
        "AXE_AUTH_BASIC_PASSWORD",
        "AXE_AUTH_RESTRICTED_URLS",
    ]
    .iter()
    .any(|name| lookup(name).is_some());
    if !has_auth_env {
        return;
    }

    let entry = config
        .auth
        .entry("default".to_string())
        .or_insert_with(AuthDomainConfig::default);

    if let Some(v) = lookup("AXE_AUTH_ENABLED") {
        if let Some(b) = parse_bool("AXE_AUTH_ENABLED", &v) {
            entry.enabled = b;
        }
    }
    if let Some(v) = lookup("AXE_AUTH_LOGIN_URL") {
        entry.login_url = Some(v);
        if !entry.strategies.contains(&AuthStrategyKind::FormLogin) {
            entry.strategies.push(AuthStrategyKind::FormLogin);
        }
    }
    if let Some(v) = lookup("AXE_AUTH_USERNAME") {
        entry.username = Some(v);
    }
    if let Some(v) = lookup("AXE_AUTH_PASSWORD") {
        entry.password = Some(v);
    }
    if let Some(v) = lookup("AXE_AUTH_BASIC_USERNAME") {
        entry.basic_username = Some(v);
        if !entry.strategies.contains(&AuthStrategyKind::HttpBasic) {
            entry.strategies.push(AuthStrategyKind::HttpBasic);
        }
    }
    if let Some(v) = lookup("AXE_AUTH_BASIC_PASSWORD") {
        entry.basic_password = Some(v);
    }
    if let Some(v) = lookup("AXE_AUTH_RESTRICTED_URLS") {
        entry.restricted_url_prefixes = split_csv(&v);
    }
}
