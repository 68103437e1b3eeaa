//! Per-domain failure tracking and abandonment.
//!
//! A domain whose error rate climbs past the configured threshold (after a
//! minimum number of attempts) is abandoned for the rest of the run:
//! pending URLs for it are dropped and no new ones are enqueued.

use dashmap::DashMap;
use log::warn;

#[derive(Debug, Default, Clone)]
struct DomainRecord {
    attempts: u32,
    errors: u32,
    abandoned: bool,
}

pub struct DomainHealth {
    records: DashMap<String, DomainRecord>,
    error_rate_threshold: f64,
    min_attempts: u32,
}

impl DomainHealth {
    #[must_use]
    pub fn new(error_rate_threshold: f64, min_attempts: u32) -> Self {
        Self {
            records: DashMap::new(),
            error_rate_threshold,
            min_attempts: min_attempts.max(1),
        }
    }

    pub fn record_success(&self, domain: &str) {
        let mut record = self.records.entry(domain.to_string()).or_default();
        record.attempts += 1;
    }

    /// Record a failed attempt. Returns true when this failure tipped the
    /// domain into abandonment.
    pub fn record_failure(&self, domain: &str) -> bool {
        let mut record = self.records.entry(domain.to_string()).or_default();
        record.attempts += 1;
        record.errors += 1;

        if record.abandoned || record.attempts < self.min_attempts {
            return false;
        }
        let rate = f64::from(record.errors) / f64::from(record.attempts);
        if rate > self.error_rate_threshold {
            record.abandoned = true;
            warn!(
                "abandoning domain '{domain}': error rate {:.0}% over {} attempts",
                rate * 100.0,
                record.attempts
            );
            return true;
        }
        false
    }

    #[must_use]
    pub fn is_abandoned(&self, domain: &str) -> bool {
        self.records
            .get(domain)
            .map(|r| r.abandoned)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn error_count(&self, domain: &str) -> u32 {
        self.records.get(domain).map(|r| r.errors).unwrap_or(0)
    }
}
