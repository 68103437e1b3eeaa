//! Configuration resolution: defaults < file < environment < CLI.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

use crate::error::{AuditError, AuditResult};
use crate::urlnorm::domain_of;

use super::env::apply_env_overlay;
use super::types::{AuditConfig, StartStage};

/// CLI-sourced overrides, applied last. Parsing the command line itself is
/// the binary's job; the library only consumes the resolved values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub domains: Option<Vec<String>>,
    pub start_stage: Option<StartStage>,
    pub max_urls: Option<usize>,
    pub debug: bool,
}

/// Resolve the effective configuration.
///
/// Fails with [`AuditError::Fatal`] when an explicitly-passed config file is
/// missing or malformed, or when the resolved config fails validation.
pub fn resolve(overrides: &CliOverrides) -> AuditResult<AuditConfig> {
    let mut config = match &overrides.config_file {
        Some(path) => load_file(path)?,
        None => AuditConfig::default(),
    };

    apply_env_overlay(&mut config);

    if let Some(domains) = &overrides.domains {
        config.domains = domains.clone();
    }
    if let Some(stage) = overrides.start_stage {
        config.start_stage = stage;
    }
    if let Some(max_urls) = overrides.max_urls {
        config.crawler.max_urls_per_domain = max_urls;
    }
    if overrides.debug {
        config.log_level = "debug".to_string();
    }

    // Domains may arrive as URLs; store them as bare hosts.
    config.domains = config
        .domains
        .iter()
        .filter_map(|d| domain_of(d))
        .collect();

    config
        .validate()
        .map_err(AuditError::Fatal)?;

    info!(
        "configuration resolved: {} domain(s), start stage {:?}, output {}",
        config.domains.len(),
        config.start_stage,
        config.output_root.display()
    );
    Ok(config)
}

/// Load a JSON configuration file. JSON is the only supported format; the
/// error message says so when someone feeds it YAML.
pub fn load_file(path: &Path) -> AuditResult<AuditConfig> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))
        .map_err(|e| AuditError::Fatal(format!("{e:#}")))?;

    let config: AuditConfig = serde_json::from_str(&body).map_err(|e| {
        AuditError::Fatal(format!(
            "config file {} is not valid JSON ({e}); only JSON configs are supported",
            path.display()
        ))
    })?;
    debug!("loaded config file {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_overrides_win_over_file() {
        let _guard = crate::config::TEST_ENV_LOCK.lock();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"domains": ["file.test"], "crawler": {{"max_urls_per_domain": 50}}}}"#
        )
        .unwrap();

        let overrides = CliOverrides {
            config_file: Some(file.path().to_path_buf()),
            domains: Some(vec!["cli.test".to_string()]),
            max_urls: Some(9),
            ..CliOverrides::default()
        };
        let config = resolve(&overrides).unwrap();
        assert_eq!(config.domains, vec!["cli.test"]);
        assert_eq!(config.crawler.max_urls_per_domain, 9);
    }

    #[test]
    fn file_aliases_are_accepted() {
        let _guard = crate::config::TEST_ENV_LOCK.lock();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"BASE_URLS": ["https://www.e.test/"], "crawler": {{"CRAWLER_MAX_URLS": 3}}}}"#
        )
        .unwrap();
        let overrides = CliOverrides {
            config_file: Some(file.path().to_path_buf()),
            ..CliOverrides::default()
        };
        let config = resolve(&overrides).unwrap();
        assert_eq!(config.domains, vec!["e.test"]);
        assert_eq!(config.crawler.max_urls_per_domain, 3);
    }

    #[test]
    fn missing_explicit_config_is_fatal() {
        let _guard = crate::config::TEST_ENV_LOCK.lock();
        let overrides = CliOverrides {
            config_file: Some(PathBuf::from("/definitely/not/here.json")),
            ..CliOverrides::default()
        };
        match resolve(&overrides) {
            Err(AuditError::Fatal(_)) => {}
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_resolved_config_is_fatal() {
        let _guard = crate::config::TEST_ENV_LOCK.lock();
        // No domains anywhere -> validation failure.
        let overrides = CliOverrides::default();
        match resolve(&overrides) {
            Err(AuditError::Fatal(msg)) => assert!(msg.contains("domain")),
            other => panic!("expected fatal error, got {other:?}"),
        }
    }
}
