//! Error taxonomy shared across pipeline stages.
//!
//! Stages return structured results rather than bubbling raw errors; the
//! kinds here drive the recovery policy (skip, retry, degrade, abort).

use thiserror::Error;

/// Classified audit errors. The variant decides how far the damage spreads:
/// everything short of [`AuditError::Fatal`] keeps the run alive.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Unparsable URL, malformed config entry. Offending input is skipped.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network timeouts, 5xx, 429, connection resets. Retried with backoff
    /// before being surfaced.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 401/403 without credentials, or a failed login. Restricted URLs are
    /// skipped; the run continues.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Browser crash or script-injection failure. The worker restarts and
    /// the URL gets one more attempt.
    #[error("driver failure: {0}")]
    DriverFailure(String),

    /// Unreadable checkpoint. Treated as "no prior state".
    #[error("state corruption: {0}")]
    StateCorruption(String),

    /// Missing required configuration, unwritable output root. Aborts the
    /// run with exit code 2.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl AuditError {
    /// Whether the orchestrator must abort the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Classify an HTTP status into an error kind, if it is an error at all.
    #[must_use]
    pub fn from_status(status: u16, url: &str) -> Option<Self> {
        match status {
            200..=399 => None,
            401 | 403 => Some(Self::AccessDenied(format!("{status} for {url}"))),
            408 | 429 | 500 | 502 | 503 | 504 | 520..=524 => {
                Some(Self::Transient(format!("{status} for {url}")))
            }
            _ => Some(Self::InvalidInput(format!("{status} for {url}"))),
        }
    }
}

/// Convenience alias used at stage boundaries.
pub type AuditResult<T> = Result<T, AuditError>;

/// One recorded error inside a stage outcome. Keeps the URL (or other
/// subject) so the run summary can name what was lost.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StageError {
    pub subject: String,
    pub kind: String,
    pub message: String,
}

impl StageError {
    pub fn new(subject: impl Into<String>, error: &AuditError) -> Self {
        let kind = match error {
            AuditError::InvalidInput(_) => "invalid_input",
            AuditError::Transient(_) => "transient",
            AuditError::AccessDenied(_) => "access_denied",
            AuditError::DriverFailure(_) => "driver_failure",
            AuditError::StateCorruption(_) => "state_corruption",
            AuditError::Fatal(_) => "fatal",
        };
        Self {
            subject: subject.into(),
            kind: kind.to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(AuditError::from_status(200, "u").is_none());
        assert!(AuditError::from_status(301, "u").is_none());
        assert!(matches!(
            AuditError::from_status(403, "u"),
            Some(AuditError::AccessDenied(_))
        ));
        assert!(matches!(
            AuditError::from_status(429, "u"),
            Some(AuditError::Transient(_))
        ));
        assert!(matches!(
            AuditError::from_status(522, "u"),
            Some(AuditError::Transient(_))
        ));
        assert!(matches!(
            AuditError::from_status(404, "u"),
            Some(AuditError::InvalidInput(_))
        ));
    }

    #[test]
    fn only_fatal_is_fatal() {
        assert!(AuditError::Fatal("x".into()).is_fatal());
        assert!(!AuditError::Transient("x".into()).is_fatal());
    }
}
