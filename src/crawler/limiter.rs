//! Per-domain concurrency limiter.
//!
//! Each domain gets its own lazily-created semaphore so one slow host
//! cannot monopolize the global request budget, and no host sees more than
//! the configured number of simultaneous requests.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct DomainLimiter {
    semaphores: DashMap<String, Arc<Semaphore>>,
    max_per_domain: usize,
}

impl DomainLimiter {
    #[must_use]
    pub fn new(max_per_domain: usize) -> Self {
        Self {
            semaphores: DashMap::new(),
            max_per_domain: max_per_domain.max(1),
        }
    }

    /// Acquire a permit for the domain, creating its semaphore on first
    /// use. The permit releases on drop.
    pub async fn acquire(&self, domain: &str) -> OwnedSemaphorePermit {
        let semaphore = self
            .semaphores
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_domain)))
            .clone();

        loop {
            match semaphore.clone().acquire_owned().await {
                Ok(permit) => return permit,
                Err(_) => {
                    // Closed semaphores never happen in normal operation;
                    // replace and retry rather than wedging the crawl.
                    log::error!("semaphore for '{domain}' closed unexpectedly, replacing");
                    let fresh = Arc::new(Semaphore::new(self.max_per_domain));
                    self.semaphores.insert(domain.to_string(), fresh.clone());
                    if let Ok(permit) = fresh.acquire_owned().await {
                        return permit;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounds_concurrency_per_domain() {
        let limiter = DomainLimiter::new(2);
        let a = limiter.acquire("e.test").await;
        let _b = limiter.acquire("e.test").await;

        // Third acquire for the same domain must wait...
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            limiter.acquire("e.test"),
        )
        .await;
        assert!(pending.is_err(), "third permit should not be granted");

        // ...but a different domain is unaffected.
        let _other = limiter.acquire("other.test").await;

        drop(a);
        let granted = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            limiter.acquire("e.test"),
        )
        .await;
        assert!(granted.is_ok(), "permit should free up after drop");
    }
}
