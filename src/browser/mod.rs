//! Headless-browser launch and lifecycle.
//!
//! Finds a system Chrome/Chromium (or downloads a managed build), launches
//! it with a dedicated profile directory, and drives the CDP connection on
//! a background task. Each stage owns its browsers through [`BrowserHandle`]
//! values; nothing shares a live session across stages.

pub mod page_ops;
mod pool;

pub use pool::{DriverGuard, DriverPool};

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

const AUDIT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Find a Chrome/Chromium executable: `CHROMIUM_PATH` override, common
/// install locations, then `which`.
pub async fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points to a non-existent file: {}",
            path.display()
        );
    }

    let paths = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for path_str in paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            debug!("found browser at {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !found.is_empty() {
                        debug!("found browser via which: {found}");
                        return Ok(PathBuf::from(found));
                    }
                }
            }
        }
    }

    Err(anyhow::anyhow!("Chrome/Chromium executable not found"))
}

/// Download a managed Chromium build into the user cache directory.
pub async fn download_managed_browser() -> Result<PathBuf> {
    let cache_root = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("axe-audit")
        .join("chromium");
    tokio::fs::create_dir_all(&cache_root)
        .await
        .with_context(|| format!("creating {}", cache_root.display()))?;

    info!("downloading managed Chromium into {}", cache_root.display());
    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_root)
            .build()
            .map_err(|e| anyhow::anyhow!("browser fetcher options: {e}"))?,
    );
    let revision = fetcher
        .fetch()
        .await
        .context("downloading managed Chromium")?;
    Ok(revision.executable_path)
}

/// Launch a browser with an isolated profile directory.
///
/// Returns the browser, the handler task driving the CDP connection, and
/// the profile directory (caller-owned; removed by [`BrowserHandle`] on
/// drop when the handle created it).
pub async fn launch_browser(
    headless: bool,
    user_data_dir: Option<PathBuf>,
) -> Result<(Browser, JoinHandle<()>, PathBuf)> {
    let chrome_path = match find_browser_executable().await {
        Ok(path) => path,
        Err(_) => download_managed_browser().await?,
    };

    let profile_dir = match user_data_dir {
        Some(dir) => dir,
        None => std::env::temp_dir().join(format!(
            "axe_audit_profile_{}_{:08x}",
            std::process::id(),
            rand::random::<u32>()
        )),
    };
    std::fs::create_dir_all(&profile_dir)
        .with_context(|| format!("creating {}", profile_dir.display()))?;

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1920, 1080)
        .user_data_dir(profile_dir.clone())
        .chrome_executable(chrome_path);

    if headless {
        config_builder = config_builder.headless_mode(HeadlessMode::default());
    } else {
        config_builder = config_builder.with_head();
    }

    config_builder = config_builder
        .arg(format!("--user-agent={AUDIT_USER_AGENT}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--incognito")
        .arg("--ignore-certificate-errors")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-networking")
        .arg("--disable-hang-monitor")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    let browser_config = config_builder
        .build()
        .map_err(|e| anyhow::anyhow!("building browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("launching browser")?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let msg = e.to_string();
                // Chrome emits CDP events chromiumoxide does not model;
                // those deserialization misses are noise, not failures.
                let benign = msg.contains("data did not match any variant of untagged enum Message")
                    || msg.contains("Failed to deserialize WS response");
                if benign {
                    trace!("suppressed benign CDP serialization error: {msg}");
                } else {
                    error!("browser handler error: {msg}");
                }
            }
        }
        debug!("browser handler task finished");
    });

    Ok((browser, handler_task, profile_dir))
}

/// Owning wrapper around a launched browser: aborts the handler task and
/// removes the profile directory on drop.
#[derive(Debug)]
pub struct BrowserHandle {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    profile_dir: Option<PathBuf>,
}

impl BrowserHandle {
    /// Launch a fresh browser with its own temp profile.
    pub async fn launch(headless: bool) -> Result<Self> {
        let (browser, handler_task, profile_dir) = launch_browser(headless, None).await?;
        Ok(Self {
            browser: Arc::new(browser),
            handler_task,
            profile_dir: Some(profile_dir),
        })
    }

    #[must_use]
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    #[must_use]
    pub fn browser_arc(&self) -> Arc<Browser> {
        Arc::clone(&self.browser)
    }

    /// CDP liveness probe.
    pub async fn is_healthy(&self) -> bool {
        self.browser.version().await.is_ok()
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler_task.abort();
        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("could not remove profile dir {}: {e}", dir.display());
            }
        }
    }
}
