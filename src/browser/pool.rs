//! Fixed-size pool of scanner browsers.
//!
//! The scanner owns exactly `pool_size` drivers. Workers check one out,
//! scan a URL, and return it through the RAII guard; a driver that fails
//! its health check is replaced rather than handed out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::BrowserHandle;

/// A pooled driver with a stable id for log correlation.
#[derive(Debug)]
pub struct PooledDriver {
    pub id: u64,
    pub handle: BrowserHandle,
}

/// Bounded pool; `acquire` blocks until a driver is free.
pub struct DriverPool {
    headless: bool,
    available: Mutex<VecDeque<PooledDriver>>,
    slots: Semaphore,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl DriverPool {
    /// Launch `size` browsers up front. Fails when none could be launched;
    /// a partially-filled pool is accepted with a warning.
    pub async fn launch(size: usize, headless: bool) -> Result<Arc<Self>> {
        let pool = Arc::new(Self {
            headless,
            available: Mutex::new(VecDeque::with_capacity(size)),
            slots: Semaphore::new(0),
            next_id: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let mut launched = 0usize;
        for _ in 0..size {
            match pool.launch_driver().await {
                Ok(driver) => {
                    pool.available.lock().await.push_back(driver);
                    pool.slots.add_permits(1);
                    launched += 1;
                }
                Err(e) => warn!("failed to launch pool driver: {e:#}"),
            }
        }

        if launched == 0 {
            anyhow::bail!("could not launch any of {size} pool drivers");
        }
        if launched < size {
            warn!("driver pool degraded: {launched}/{size} browsers launched");
        }
        info!("driver pool ready with {launched} browser(s)");
        Ok(pool)
    }

    async fn launch_driver(&self) -> Result<PooledDriver> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = BrowserHandle::launch(self.headless)
            .await
            .context("launching pool browser")?;
        debug!("launched pool driver {id}");
        Ok(PooledDriver { id, handle })
    }

    /// Check out a healthy driver, replacing dead ones as they surface.
    pub async fn acquire(self: &Arc<Self>) -> Result<DriverGuard> {
        loop {
            let permit = self
                .slots
                .acquire()
                .await
                .context("driver pool closed")?;
            permit.forget();

            let driver = self.available.lock().await.pop_front();
            let Some(driver) = driver else {
                // Slot count and queue disagree only around shutdown.
                anyhow::bail!("driver pool empty");
            };

            if driver.handle.is_healthy().await {
                return Ok(DriverGuard {
                    driver: Some(driver),
                    pool: Arc::clone(self),
                });
            }

            warn!("pool driver {} failed health check, replacing", driver.id);
            drop(driver);
            match self.launch_driver().await {
                Ok(fresh) => {
                    self.available.lock().await.push_back(fresh);
                    self.slots.add_permits(1);
                }
                Err(e) => {
                    warn!("could not replace dead driver: {e:#}");
                    // The pool shrinks by one slot; remaining drivers carry on.
                }
            }
        }
    }

    fn release(self: &Arc<Self>, driver: PooledDriver) {
        if self.shutdown.load(Ordering::Relaxed) {
            // Dropped on the floor; BrowserHandle::drop cleans up.
            return;
        }
        let id = driver.id;
        let pool = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.available.lock().await.push_back(driver);
                    pool.slots.add_permits(1);
                    debug!("driver {id} returned to pool");
                });
            }
            Err(_) => {
                // Guard dropped outside the runtime (process teardown);
                // the browser handle cleans itself up.
                drop(driver);
            }
        }
    }

    /// Drop all pooled browsers. Outstanding guards clean up on drop.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let mut available = self.available.lock().await;
        let count = available.len();
        available.clear();
        info!("driver pool shut down ({count} browsers closed)");
    }
}

/// RAII checkout: returns the driver to the pool on drop.
pub struct DriverGuard {
    driver: Option<PooledDriver>,
    pool: Arc<DriverPool>,
}

impl DriverGuard {
    #[must_use]
    pub fn browser(&self) -> &chromiumoxide::Browser {
        self.driver
            .as_ref()
            .expect("driver present until drop")
            .handle
            .browser()
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.driver.as_ref().expect("driver present until drop").id
    }

    /// Mark this driver as dead: it is dropped instead of returned, and the
    /// pool replaces it on the next acquire cycle.
    pub fn discard(mut self) {
        if let Some(driver) = self.driver.take() {
            warn!("discarding driver {} after failure", driver.id);
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                drop(driver);
                match pool.launch_driver().await {
                    Ok(fresh) => {
                        pool.available.lock().await.push_back(fresh);
                        pool.slots.add_permits(1);
                    }
                    Err(e) => warn!("could not replace discarded driver: {e:#}"),
                }
            });
        }
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            self.pool.release(driver);
        }
    }
}
