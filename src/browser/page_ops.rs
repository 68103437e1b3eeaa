//! Shared chromiumoxide Page operations for the auth driver, funnel
//! executor and scanner.
//!
//! Everything here is polling-based: visibility and clickability are
//! evaluated in-page, with bounded waits, so callers never hang on a
//! selector that will never appear.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chromiumoxide::page::Page;
use tracing::{debug, trace};

/// Quote a string for safe embedding into an evaluated script.
#[must_use]
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Page URL with a diagnostic fallback.
pub async fn page_url_or_blank(page: &Page) -> String {
    match page.url().await {
        Ok(Some(url)) => url,
        Ok(None) => "about:blank".to_string(),
        Err(e) => {
            trace!("failed to read page URL: {e}");
            "about:blank".to_string()
        }
    }
}

/// Whether the first element matching `selector` is rendered (attached and
/// occupying layout space).
pub async fn is_visible(page: &Page, selector: &str) -> Result<bool> {
    let script = format!(
        "(() => {{ const el = document.querySelector({sel}); \
         return !!(el && (el.offsetParent !== null || el.tagName === 'BODY')); }})()",
        sel = js_string(selector)
    );
    let value = page
        .evaluate(script)
        .await
        .context("evaluating visibility probe")?
        .into_value::<bool>()
        .unwrap_or(false);
    Ok(value)
}

/// Visible and not disabled.
pub async fn is_clickable(page: &Page, selector: &str) -> Result<bool> {
    let script = format!(
        "(() => {{ const el = document.querySelector({sel}); \
         return !!(el && el.offsetParent !== null && !el.disabled); }})()",
        sel = js_string(selector)
    );
    let value = page
        .evaluate(script)
        .await
        .context("evaluating clickability probe")?
        .into_value::<bool>()
        .unwrap_or(false);
    Ok(value)
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll until the selector is visible or the timeout elapses.
pub async fn wait_for_visible(page: &Page, selector: &str, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if is_visible(page, selector).await.unwrap_or(false) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            debug!("timed out waiting for '{selector}'");
            return Ok(false);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll until the selector is clickable or the timeout elapses.
pub async fn wait_for_clickable(page: &Page, selector: &str, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if is_clickable(page, selector).await.unwrap_or(false) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            debug!("timed out waiting for clickable '{selector}'");
            return Ok(false);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Click with a JS fallback: scroll into view, try the trusted click via the
/// element handle, fall back to an in-page `el.click()` for elements the
/// driver considers non-interactable.
pub async fn click_with_fallback(page: &Page, selector: &str) -> Result<()> {
    let scroll = format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (el) el.scrollIntoView({{block: 'center'}}); }})()",
        sel = js_string(selector)
    );
    let _ = page.evaluate(scroll).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    match page.find_element(selector).await {
        Ok(element) => match element.click().await {
            Ok(_) => return Ok(()),
            Err(e) => debug!("native click on '{selector}' failed ({e}), trying JS click"),
        },
        Err(e) => debug!("element '{selector}' not found for native click ({e})"),
    }

    let js_click = format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return false; el.click(); return true; }})()",
        sel = js_string(selector)
    );
    let clicked = page
        .evaluate(js_click)
        .await
        .context("JS click")?
        .into_value::<bool>()
        .unwrap_or(false);
    if clicked {
        Ok(())
    } else {
        anyhow::bail!("no element matches '{selector}'")
    }
}

/// Clear the field and type a value through the keyboard.
pub async fn fill_input(page: &Page, selector: &str, value: &str) -> Result<()> {
    let clear = format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (el) {{ el.focus(); el.value = ''; }} }})()",
        sel = js_string(selector)
    );
    let _ = page.evaluate(clear).await;

    let element = page
        .find_element(selector)
        .await
        .with_context(|| format!("finding input '{selector}'"))?;
    element.click().await.ok();
    element
        .type_str(value)
        .await
        .with_context(|| format!("typing into '{selector}'"))?;
    Ok(())
}

/// Pick an option by value on a `<select>`, dispatching a change event.
pub async fn select_option(page: &Page, selector: &str, value: &str) -> Result<()> {
    let script = format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
         el.value = {val}; el.dispatchEvent(new Event('change', {{bubbles: true}})); \
         return true; }})()",
        sel = js_string(selector),
        val = js_string(value)
    );
    let ok = page
        .evaluate(script)
        .await
        .context("selecting option")?
        .into_value::<bool>()
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        anyhow::bail!("no select element matches '{selector}'")
    }
}

/// Submit the matched form, or the first form on the page.
pub async fn submit_form(page: &Page, selector: Option<&str>) -> Result<()> {
    let script = match selector {
        Some(sel) => format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             const form = el.tagName === 'FORM' ? el : el.closest('form'); \
             if (!form) return false; form.submit(); return true; }})()",
            sel = js_string(sel)
        ),
        None => "(() => { const form = document.querySelector('form'); \
                 if (!form) return false; form.submit(); return true; })()"
            .to_string(),
    };
    let ok = page
        .evaluate(script)
        .await
        .context("submitting form")?
        .into_value::<bool>()
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        anyhow::bail!("no form found to submit")
    }
}

/// Whether the serialized page contains a text fragment.
pub async fn page_text_contains(page: &Page, text: &str) -> Result<bool> {
    let html = page.content().await.context("reading page content")?;
    Ok(html.contains(text))
}

/// Best-effort dismissal of common cookie/consent banners. Returns whether
/// anything was clicked.
pub async fn dismiss_cookie_banner(page: &Page) -> Result<bool> {
    const SCRIPT: &str = r#"
        (() => {
            try {
                const buttons = document.querySelectorAll(
                    'button[id*="cookie"], button[class*="cookie"], ' +
                    'button[id*="consent"], button[class*="consent"], ' +
                    '#onetrust-accept-btn-handler, .cookie-banner .accept, ' +
                    '.cookie-notice .accept'
                );
                for (const button of buttons) {
                    if (button.offsetParent !== null) {
                        button.click();
                        return true;
                    }
                }
                const generic = document.querySelectorAll('button, a, div[role="button"]');
                for (const el of generic) {
                    const text = el.textContent.toLowerCase();
                    if ((text.includes('accept') || text.includes('accetta') ||
                         text.includes('agree') || text.includes('consent')) &&
                        el.offsetParent !== null) {
                        el.click();
                        return true;
                    }
                }
                return false;
            } catch (e) {
                return false;
            }
        })()
    "#;
    let clicked = page
        .evaluate(SCRIPT)
        .await
        .context("running cookie-banner script")?
        .into_value::<bool>()
        .unwrap_or(false);
    if clicked {
        debug!("dismissed a cookie/consent banner");
    }
    Ok(clicked)
}
