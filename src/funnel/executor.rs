//! Funnel execution against a live browser.
//!
//! Steps run strictly in order on a single worker. Each step captures an
//! HTML snapshot and a screenshot before its verdict is recorded, so even a
//! failed step leaves a scannable artifact behind. The first failure skips
//! the remaining steps.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::page::Page;
use tracing::{info, warn};

use crate::auth::AuthSession;
use crate::browser::page_ops::{
    self, click_with_fallback, dismiss_cookie_banner, fill_input, page_url_or_blank,
    select_option, submit_form, wait_for_clickable, wait_for_visible,
};
use crate::browser::BrowserHandle;
use crate::output::{domain_slug, OutputLayout};

use super::{
    Action, FunnelArtifact, FunnelArtifacts, FunnelDefinition, StepResult, SuccessCondition,
};

const INTER_ACTION_PAUSE: Duration = Duration::from_millis(500);

/// Single-worker executor for one funnel at a time.
pub struct FunnelExecutor<'a> {
    layout: &'a OutputLayout,
    auth: Option<&'a AuthSession>,
    headless: bool,
}

impl<'a> FunnelExecutor<'a> {
    #[must_use]
    pub fn new(layout: &'a OutputLayout, auth: Option<&'a AuthSession>, headless: bool) -> Self {
        Self {
            layout,
            auth,
            headless,
        }
    }

    /// Execute all steps, capture artifacts, and write `results.json`.
    pub async fn run(&self, funnel: &FunnelDefinition) -> Result<FunnelArtifacts> {
        let funnel_dir = self.layout.funnel_dir(&funnel.id);
        tokio::fs::create_dir_all(&funnel_dir)
            .await
            .with_context(|| format!("creating {}", funnel_dir.display()))?;

        let handle = BrowserHandle::launch(self.headless)
            .await
            .context("launching funnel browser")?;
        let page = handle
            .browser()
            .new_page("about:blank")
            .await
            .context("opening funnel page")?;

        // An authenticated funnel reuses the session by value: cookies are
        // injected into this executor's own browser.
        if funnel.auth_required {
            match self.auth {
                Some(session) if session.authenticated => {
                    if let Some(first_url) = funnel.steps.first().and_then(|s| s.url.as_deref()) {
                        page.goto(first_url).await.ok();
                        page.wait_for_navigation().await.ok();
                    }
                    session.apply_to_page(&page).await.ok();
                }
                _ => warn!(
                    "funnel '{}' wants auth but no authenticated session exists",
                    funnel.id
                ),
            }
        }

        let mut outcome = FunnelArtifacts {
            funnel_id: funnel.id.clone(),
            total_steps: funnel.steps.len(),
            steps_completed: 0,
            artifacts: Vec::new(),
            results: Vec::new(),
        };

        for (index, step) in funnel.steps.iter().enumerate() {
            info!("funnel '{}' step {}: {}", funnel.id, index + 1, step.name);
            let success = self.run_step(&page, step).await;

            let url = page_url_or_blank(&page).await;
            let artifact = self
                .capture_artifacts(&page, funnel, index, &step.name, &url, success, &funnel_dir)
                .await;
            match artifact {
                Ok(artifact) => outcome.artifacts.push(artifact),
                Err(e) => warn!(
                    "funnel '{}' step {} artifact capture failed: {e:#}",
                    funnel.id,
                    index + 1
                ),
            }
            outcome.results.push(StepResult {
                step: step.name.clone(),
                url,
                success,
            });

            if success {
                outcome.steps_completed += 1;
            } else {
                warn!(
                    "funnel '{}' stopped at step {} ('{}')",
                    funnel.id,
                    index + 1,
                    step.name
                );
                break;
            }
        }

        let results_path = funnel_dir.join("results.json");
        self.layout
            .atomic_write_json(&results_path, &outcome)
            .context("writing funnel results.json")?;

        page.close().await.ok();
        Ok(outcome)
    }

    /// Navigate, wait, run actions, then evaluate the success predicate.
    async fn run_step(&self, page: &Page, step: &super::FunnelStep) -> bool {
        let timeout = Duration::from_secs(step.timeout_secs);

        if let Some(url) = &step.url {
            if let Err(e) = page.goto(url.as_str()).await {
                warn!("step '{}': navigation to {url} failed: {e}", step.name);
                return false;
            }
            page.wait_for_navigation().await.ok();
        }

        if let Some(selector) = &step.wait_for_selector {
            match wait_for_visible(page, selector, timeout).await {
                Ok(true) => {}
                _ => {
                    warn!("step '{}': '{selector}' never became visible", step.name);
                    return false;
                }
            }
        }

        for action in &step.actions {
            if let Err(e) = Self::perform_action(
                page,
                action,
                Some(&self.layout.component_dir(crate::output::Component::Screenshots)),
            )
            .await
            {
                warn!("step '{}': action failed: {e:#}", step.name);
                return false;
            }
            tokio::time::sleep(INTER_ACTION_PAUSE).await;
        }

        match &step.success_condition {
            None => true,
            Some(condition) => Self::check_condition(page, condition, timeout).await,
        }
    }

    /// Execute one action. `screenshot_dir` hosts `Screenshot` outputs; the
    /// auth driver passes `None` and the action degrades to a no-op.
    pub async fn perform_action(
        page: &Page,
        action: &Action,
        screenshot_dir: Option<&Path>,
    ) -> Result<()> {
        match action {
            Action::Wait { seconds, selector } => match selector {
                Some(selector) => {
                    let timeout =
                        Duration::from_secs_f64(seconds.unwrap_or(10.0).max(0.0));
                    if !wait_for_visible(page, selector, timeout).await? {
                        anyhow::bail!("timed out waiting for '{selector}'");
                    }
                    Ok(())
                }
                None => {
                    let pause = Duration::from_secs_f64(seconds.unwrap_or(1.0).max(0.0));
                    tokio::time::sleep(pause).await;
                    Ok(())
                }
            },
            Action::Click { selector } => click_with_fallback(page, selector).await,
            Action::Input { selector, value } => fill_input(page, selector, value).await,
            Action::Select { selector, value } => select_option(page, selector, value).await,
            Action::SubmitForm { selector } => submit_form(page, selector.as_deref()).await,
            Action::Script { code } => {
                page.evaluate(code.as_str())
                    .await
                    .context("running scripted action")?;
                Ok(())
            }
            Action::Screenshot { filename } => {
                let Some(dir) = screenshot_dir else {
                    return Ok(());
                };
                tokio::fs::create_dir_all(dir).await.ok();
                let path = dir.join(sanitize_filename::sanitize(filename));
                let data = page
                    .screenshot(screenshot_params())
                    .await
                    .context("capturing action screenshot")?;
                tokio::fs::write(&path, data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                Ok(())
            }
            Action::CookieBanner => {
                dismiss_cookie_banner(page).await?;
                Ok(())
            }
        }
    }

    async fn check_condition(
        page: &Page,
        condition: &SuccessCondition,
        timeout: Duration,
    ) -> bool {
        match condition {
            SuccessCondition::ElementVisible { selector } => {
                wait_for_visible(page, selector, timeout).await.unwrap_or(false)
            }
            SuccessCondition::ElementClickable { selector } => {
                wait_for_clickable(page, selector, timeout).await.unwrap_or(false)
            }
            SuccessCondition::UrlContains { text } => {
                page_url_or_blank(page).await.contains(text)
            }
            SuccessCondition::TextContains { text } => {
                page_ops::page_text_contains(page, text).await.unwrap_or(false)
            }
        }
    }

    async fn capture_artifacts(
        &self,
        page: &Page,
        funnel: &FunnelDefinition,
        index: usize,
        step_name: &str,
        url: &str,
        success: bool,
        funnel_dir: &Path,
    ) -> Result<FunnelArtifact> {
        let slug = domain_slug(step_name);
        let html_path = funnel_dir.join(format!("step_{}_{slug}.html", index + 1));
        let png_path = funnel_dir.join(format!("step_{}_{slug}.png", index + 1));

        let html = page.content().await.context("reading step HTML")?;
        self.layout
            .atomic_write(&html_path, html.as_bytes())
            .context("writing step HTML snapshot")?;

        let screenshot_path = match page.screenshot(screenshot_params()).await {
            Ok(data) => {
                self.layout.atomic_write(&png_path, &data)?;
                Some(png_path)
            }
            Err(e) => {
                warn!("step screenshot failed: {e}");
                None
            }
        };

        Ok(FunnelArtifact {
            funnel_id: funnel.id.clone(),
            step_index: index,
            step_name: step_name.to_string(),
            url: url.to_string(),
            html_snapshot_path: html_path,
            screenshot_path,
            success,
        })
    }
}

fn screenshot_params() -> CaptureScreenshotParams {
    CaptureScreenshotParams {
        format: Some(CaptureScreenshotFormat::Png),
        capture_beyond_viewport: Some(true),
        ..Default::default()
    }
}
