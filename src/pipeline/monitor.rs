//! Resource monitor: CPU/memory sampling with a pause signal.
//!
//! When either threshold is exceeded the monitor raises the paused flag for
//! the cool-down period; the orchestrator holds new work until the flag
//! clears. Workers already in flight finish normally.

use std::time::Duration;

use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ResourceMonitorConfig;

/// Receiver side of the pause flag.
#[derive(Debug, Clone)]
pub struct PauseGate {
    paused: watch::Receiver<bool>,
}

impl PauseGate {
    /// A gate that never pauses (monitor disabled).
    #[must_use]
    pub fn open() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { paused: rx }
    }

    /// Wait until the monitor is not signalling overload.
    pub async fn wait_until_clear(&self) {
        let mut rx = self.paused.clone();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }
}

/// Spawn the monitor task. Returns the gate and the task handle; the task
/// exits when `shutdown` flips true.
pub fn spawn_monitor(
    config: ResourceMonitorConfig,
    shutdown: watch::Receiver<bool>,
) -> (PauseGate, Option<JoinHandle<()>>) {
    if !config.enabled {
        info!("resource monitor disabled by configuration");
        return (PauseGate::open(), None);
    }

    let (pause_tx, pause_rx) = watch::channel(false);
    let gate = PauseGate { paused: pause_rx };

    let handle = tokio::spawn(async move {
        let mut system = System::new();
        let check_interval = Duration::from_secs(config.check_interval_secs.max(1));
        let cool_down = Duration::from_secs(config.cool_down_secs.max(1));

        loop {
            if *shutdown.borrow() {
                break;
            }

            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = system.global_cpu_usage();
            let total_memory = system.total_memory();
            let memory = if total_memory > 0 {
                (system.used_memory() as f32 / total_memory as f32) * 100.0
            } else {
                0.0
            };
            debug!("resources: cpu {cpu:.1}%, memory {memory:.1}%");

            if cpu > config.cpu_threshold || memory > config.memory_threshold {
                warn!(
                    "resource pressure (cpu {cpu:.1}%, memory {memory:.1}%), \
                     pausing scheduling for {}s",
                    cool_down.as_secs()
                );
                let _ = pause_tx.send(true);
                tokio::time::sleep(cool_down).await;
                let _ = pause_tx.send(false);
            } else {
                tokio::time::sleep(check_interval).await;
            }
        }
        debug!("resource monitor exiting");
    });

    (gate, Some(handle))
}
