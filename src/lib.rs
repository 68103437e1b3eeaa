//! axe-audit: template-sampling accessibility auditor.
//!
//! Three coupled subsystems behind one pipeline: a polite multi-domain
//! crawler that clusters pages by DOM-structure templates, an axe-core
//! scanner driving a pool of headless browsers over the representative
//! pages, and an analyzer that turns raw findings into ranked,
//! WCAG-annotated report tables.
//!
//! Each stage is a library operation from configuration to a persisted
//! artifact; the orchestrator wires them together by path, so any stage can
//! be re-entered with `--start`.

pub mod analyzer;
pub mod auth;
pub mod browser;
pub mod config;
pub mod crawler;
pub mod error;
pub mod funnel;
pub mod output;
pub mod pipeline;
pub mod report_io;
pub mod scanner;
pub mod template;
pub mod urlnorm;

pub use analyzer::{AccessibilityAnalyzer, Report};
pub use auth::{AuthDriver, AuthSession};
pub use config::{AuditConfig, CliOverrides, StartStage};
pub use crawler::{CrawlState, SiteCrawler};
pub use error::{AuditError, AuditResult, StageError};
pub use funnel::{Action, FunnelArtifacts, FunnelDefinition, FunnelExecutor, SuccessCondition};
pub use output::OutputLayout;
pub use pipeline::{AuditPipeline, RunSummary};
pub use scanner::{AxeScanner, Impact, ScanTask, Violation, ViolationSet};
pub use template::{template_fingerprint, TemplateCluster, TemplateId};
pub use urlnorm::{NormalizedUrl, UrlNormalizer};
