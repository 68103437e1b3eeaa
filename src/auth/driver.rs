//! Login execution: form flows and HTTP Basic.
//!
//! Strategies run in the configured priority order; the first one that
//! verifies wins. Failure is reported, never fatal: dependent stages get
//! an unauthenticated session and skip restricted URLs.

use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::page::Page;
use tracing::{info, warn};

use crate::browser::page_ops::{
    self, fill_input, page_url_or_blank, wait_for_clickable, wait_for_visible,
};
use crate::browser::BrowserHandle;
use crate::config::{AuthDomainConfig, AuthStrategyKind};
use crate::funnel::Action;

use super::{basic_authorization, AuthSession, RestrictedUrls, SessionCookie};

/// Executes the configured login strategies for one domain.
pub struct AuthDriver {
    domain: String,
    config: AuthDomainConfig,
}

impl AuthDriver {
    #[must_use]
    pub fn new(domain: &str, config: AuthDomainConfig) -> Self {
        Self {
            domain: domain.to_string(),
            config,
        }
    }

    #[must_use]
    pub fn restricted_urls(&self) -> RestrictedUrls {
        RestrictedUrls::from_config(&self.config)
    }

    /// Run the strategy list against a fresh browser. Always returns a
    /// session; `authenticated` is false when every strategy failed.
    pub async fn login(&self, headless: bool) -> AuthSession {
        let restricted = self.restricted_urls();
        if !self.config.enabled {
            return AuthSession::unauthenticated(&self.domain, restricted);
        }

        let strategies = if self.config.strategies.is_empty() {
            // Enabled but no explicit list: infer from present credentials.
            let mut inferred = Vec::new();
            if self.config.login_url.is_some() {
                inferred.push(AuthStrategyKind::FormLogin);
            }
            if self.config.basic_username.is_some() {
                inferred.push(AuthStrategyKind::HttpBasic);
            }
            inferred
        } else {
            self.config.strategies.clone()
        };

        for strategy in strategies {
            match strategy {
                AuthStrategyKind::HttpBasic => {
                    if let Some(session) = self.http_basic_session(restricted.clone()) {
                        info!("{}: HTTP Basic credentials prepared", self.domain);
                        return session;
                    }
                    warn!("{}: http_basic strategy lacks credentials", self.domain);
                }
                AuthStrategyKind::FormLogin => match self.form_login(headless).await {
                    Ok(Some(cookies)) => {
                        info!(
                            "{}: form login succeeded ({} cookies captured)",
                            self.domain,
                            cookies.len()
                        );
                        let basic = self.basic_value();
                        return AuthSession::new(&self.domain, cookies, basic, restricted);
                    }
                    Ok(None) => warn!("{}: form login could not be verified", self.domain),
                    Err(e) => warn!("{}: form login failed: {e:#}", self.domain),
                },
            }
        }

        warn!(
            "{}: authentication failed, restricted-URL analysis will be skipped",
            self.domain
        );
        AuthSession::unauthenticated(&self.domain, restricted)
    }

    fn basic_value(&self) -> Option<String> {
        match (&self.config.basic_username, &self.config.basic_password) {
            (Some(user), Some(pass)) => Some(basic_authorization(user, pass)),
            _ => None,
        }
    }

    fn http_basic_session(&self, restricted: RestrictedUrls) -> Option<AuthSession> {
        let basic = self.basic_value()?;
        Some(AuthSession::new(
            &self.domain,
            Vec::new(),
            Some(basic),
            restricted,
        ))
    }

    /// Drive the form flow; `Ok(Some(cookies))` only when the success
    /// indicator verified.
    async fn form_login(&self, headless: bool) -> Result<Option<Vec<SessionCookie>>> {
        let login_url = self
            .config
            .login_url
            .as_deref()
            .context("form_login strategy requires login_url")?;
        let username = self
            .config
            .username
            .as_deref()
            .context("form_login strategy requires username")?;
        let password = self
            .config
            .password
            .as_deref()
            .context("form_login strategy requires password")?;

        let handle = BrowserHandle::launch(headless)
            .await
            .context("launching auth browser")?;
        let page = handle
            .browser()
            .new_page("about:blank")
            .await
            .context("opening auth page")?;

        let result = self
            .form_login_on_page(&page, login_url, username, password)
            .await;

        page.close().await.ok();
        result
    }

    async fn form_login_on_page(
        &self,
        page: &Page,
        login_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<Vec<SessionCookie>>> {
        let wait = Duration::from_secs(self.config.wait_time_secs);

        page.goto(login_url).await.context("navigating to login page")?;
        page.wait_for_navigation().await.ok();

        for action in &self.config.pre_login_actions {
            self.run_login_action(page, action).await;
        }

        if !wait_for_visible(page, &self.config.username_selector, wait).await? {
            anyhow::bail!(
                "username field '{}' never appeared",
                self.config.username_selector
            );
        }
        fill_input(page, &self.config.username_selector, username).await?;
        fill_input(page, &self.config.password_selector, password).await?;

        if !wait_for_clickable(page, &self.config.submit_selector, wait).await? {
            anyhow::bail!("submit '{}' never became clickable", self.config.submit_selector);
        }
        page_ops::click_with_fallback(page, &self.config.submit_selector).await?;
        page.wait_for_navigation().await.ok();
        tokio::time::sleep(Duration::from_secs(1)).await;

        for action in &self.config.post_login_actions {
            self.run_login_action(page, action).await;
        }

        if !self.verify_login(page, wait).await? {
            return Ok(None);
        }

        let cookies = collect_cookies(page).await?;
        Ok(Some(cookies))
    }

    /// Verified iff the success indicator is present (when configured) and
    /// the error indicator is absent (when configured). With neither
    /// configured, reaching a different URL than the login page counts.
    async fn verify_login(&self, page: &Page, wait: Duration) -> Result<bool> {
        if let Some(indicator) = &self.config.success_indicator {
            if !wait_for_visible(page, indicator, wait).await? {
                return Ok(false);
            }
        }
        if let Some(indicator) = &self.config.error_indicator {
            if page_ops::is_visible(page, indicator).await.unwrap_or(false) {
                return Ok(false);
            }
        }
        if self.config.success_indicator.is_none() && self.config.error_indicator.is_none() {
            let current = page_url_or_blank(page).await;
            let still_on_login = self
                .config
                .login_url
                .as_deref()
                .map(|login| current.starts_with(login))
                .unwrap_or(false);
            return Ok(!still_on_login);
        }
        Ok(true)
    }

    /// Pre/post-login actions reuse the funnel action vocabulary; failures
    /// are logged and skipped since they are best-effort preparation.
    async fn run_login_action(&self, page: &Page, action: &Action) {
        if let Err(e) = crate::funnel::FunnelExecutor::perform_action(page, action, None).await {
            warn!("{}: login action failed: {e:#}", self.domain);
        }
    }
}

/// Read the page's cookies into transferable values.
pub async fn collect_cookies(page: &Page) -> Result<Vec<SessionCookie>> {
    let cookies = page.get_cookies().await.context("reading cookies")?;
    Ok(cookies
        .into_iter()
        .map(|c| SessionCookie {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
            secure: c.secure,
            http_only: c.http_only,
            // Expiry stays behind; the session only needs to outlive a scan.
            expires: None,
        })
        .collect())
}
