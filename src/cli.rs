//! Command-line front end: flags resolve into [`CliOverrides`] and
//! everything else is the library's business.

use std::path::PathBuf;

use clap::Parser;

use axe_audit::config::{CliOverrides, StartStage};

#[derive(Debug, Parser)]
#[command(
    name = "axe-audit",
    about = "Template-sampling accessibility auditor",
    version
)]
pub struct Cli {
    /// Configuration file (JSON).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Comma-separated target domains; overrides the configured list.
    #[arg(long, value_name = "CSV")]
    pub domains: Option<String>,

    /// Stage to start from: crawler|auth|axe|funnel|analysis.
    #[arg(long, value_name = "STAGE")]
    pub start: Option<StartStage>,

    /// Per-domain URL budget override.
    #[arg(long = "max-urls", value_name = "N")]
    pub max_urls: Option<usize>,

    /// Verbose logging.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    #[must_use]
    pub fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            config_file: self.config,
            domains: self.domains.map(|csv| {
                csv.split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect()
            }),
            start_stage: self.start,
            max_urls: self.max_urls,
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_flags() {
        let cli = Cli::parse_from([
            "axe-audit",
            "--config",
            "audit.json",
            "--domains",
            "a.test, b.test",
            "--start",
            "axe",
            "--max-urls",
            "25",
            "--debug",
        ]);
        let overrides = cli.into_overrides();
        assert_eq!(overrides.config_file.as_deref(), Some(std::path::Path::new("audit.json")));
        assert_eq!(
            overrides.domains,
            Some(vec!["a.test".to_string(), "b.test".to_string()])
        );
        assert_eq!(overrides.start_stage, Some(StartStage::Axe));
        assert_eq!(overrides.max_urls, Some(25));
        assert!(overrides.debug);
    }

    #[test]
    fn defaults_are_all_none() {
        let cli = Cli::parse_from(["axe-audit"]);
        let overrides = cli.into_overrides();
        assert!(overrides.config_file.is_none());
        assert!(overrides.domains.is_none());
        assert!(overrides.start_stage.is_none());
        assert!(!overrides.debug);
    }
}
