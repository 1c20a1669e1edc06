//! Page session helpers: leasing a page from the pool, post-navigation
//! preparation, selector waits, slow typing and screenshots.

use std::path::Path;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{PageLoadWait, WaitStrategy};

use super::backend::{ChromiumBackend, ChromiumHandle};
use super::error::{BrowserError, BrowserResult};
use super::pool::{BrowserLease, BrowserPool};

const SELECTOR_POLL: Duration = Duration::from_millis(250);
const POPUP_SETTLE: Duration = Duration::from_millis(500);
const DEFAULT_WAIT: Duration = Duration::from_secs(2);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// A page opened on a leased browser. Always hand it back through
/// [`BrowserPool::release_page`] so the browser returns to the pool.
pub struct PageLease {
    page: Page,
    lease: BrowserLease<ChromiumHandle>,
}

impl PageLease {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn browser_id(&self) -> Uuid {
        self.lease.id()
    }
}

impl BrowserPool<ChromiumBackend> {
    /// Leases a browser and opens a fresh page on it, optionally navigating
    /// to `url` with a hard timeout.
    pub async fn lease_page(&self, url: Option<&str>) -> BrowserResult<PageLease> {
        let lease = self.lease().await?;
        let page = match self.open_page(&lease, url).await {
            Ok(page) => page,
            Err(err) => {
                self.release(lease).await;
                return Err(err);
            }
        };
        Ok(PageLease { page, lease })
    }

    async fn open_page(
        &self,
        lease: &BrowserLease<ChromiumHandle>,
        url: Option<&str>,
    ) -> BrowserResult<Page> {
        let params = CreateTargetParams::new("about:blank");
        let page = lease.handle().browser().new_page(params).await?;
        self.record_page_created();

        let user_agent = self.backend().config().user_agent.clone();
        if !user_agent.is_empty() {
            let override_params = SetUserAgentOverrideParams::builder()
                .user_agent(user_agent)
                .build()
                .map_err(BrowserError::Configuration)?;
            page.set_user_agent(override_params).await?;
        }

        if let Some(url) = url {
            navigate(&page, url).await?;
        }
        Ok(page)
    }

    /// Closes the page and returns the browser to the pool.
    pub async fn release_page(&self, page_lease: PageLease) {
        let PageLease { page, lease } = page_lease;
        if let Err(err) = page.close().await {
            warn!(error = %err, "failed to close page");
        }
        self.release(lease).await;
    }
}

pub async fn navigate(page: &Page, url: &str) -> BrowserResult<()> {
    let params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(BrowserError::Configuration)?;
    let navigation = async {
        page.goto(params).await?;
        page.wait_for_navigation().await?;
        Ok::<_, BrowserError>(())
    };
    tokio::time::timeout(NAVIGATION_TIMEOUT, navigation)
        .await
        .map_err(|_| BrowserError::Timeout(format!("navigation to {url}")))?
}

/// Post-navigation preparation: honor the configured wait strategy, then
/// dismiss configured overlays. Selector waits that time out are logged and
/// tolerated; the extraction pass decides what the page actually yielded.
pub async fn prepare_page(
    page: &Page,
    wait: &PageLoadWait,
    popup_selectors: &[String],
) -> BrowserResult<()> {
    match wait.strategy {
        WaitStrategy::None => {}
        WaitStrategy::Timeout => {
            let duration = wait
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WAIT);
            tokio::time::sleep(duration).await;
        }
        WaitStrategy::Selector => {
            if let Some(selector) = wait.selector.as_deref() {
                let timeout = wait
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(Duration::from_secs(10));
                if let Err(err) = wait_for_selector(page, selector, timeout).await {
                    warn!(selector, error = %err, "wait selector did not appear, continuing");
                }
            }
        }
    }
    close_popups(page, popup_selectors).await;
    Ok(())
}

pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> BrowserResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if page.find_element(selector.to_string()).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Timeout(format!("selector {selector}")));
        }
        tokio::time::sleep(SELECTOR_POLL).await;
    }
}

/// Dismisses each overlay by clicking it; when the click fails the node is
/// removed from the DOM instead. Settles briefly after any action so the
/// page can re-layout.
async fn close_popups(page: &Page, selectors: &[String]) {
    for selector in selectors {
        let Ok(element) = page.find_element(selector.to_string()).await else {
            continue;
        };
        let clicked = element.click().await;
        if let Err(err) = clicked {
            debug!(selector, error = %err, "popup click failed, removing node");
            let removal = format!(
                "((sel) => {{ document.querySelectorAll(sel).forEach((node) => node.remove()); }})({})",
                js_string(selector)
            );
            if let Err(err) = page.evaluate(removal).await {
                warn!(selector, error = %err, "failed to remove popup node");
                continue;
            }
        }
        tokio::time::sleep(POPUP_SETTLE).await;
    }
}

/// Types text one character at a time with a fixed inter-key delay.
pub async fn type_slowly(element: &Element, text: &str, delay: Duration) -> BrowserResult<()> {
    for ch in text.chars() {
        element.type_str(ch.to_string()).await?;
        tokio::time::sleep(delay).await;
    }
    Ok(())
}

/// Captures a full-page PNG under `<dir>/<safe-config-name>/`. Failures are
/// logged, never fatal to the job.
pub async fn take_screenshot(page: &Page, dir: &Path, config_name: &str, context: &str, url: &str) {
    let target_dir = dir.join(safe_name(config_name));
    if let Err(err) = tokio::fs::create_dir_all(&target_dir).await {
        warn!(error = %err, "failed to create screenshot directory");
        return;
    }
    let stamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
    let file_name = format!("{stamp}_{}_{}.png", safe_name(context), url_hash(url));
    let path = target_dir.join(file_name);

    let params = ScreenshotParams::builder().full_page(true).build();
    match page.screenshot(params).await {
        Ok(bytes) => {
            if let Err(err) = tokio::fs::write(&path, bytes).await {
                warn!(path = %path.display(), error = %err, "failed to write screenshot");
            } else {
                debug!(path = %path.display(), "screenshot captured");
            }
        }
        Err(err) => warn!(error = %err, "failed to capture screenshot"),
    }
}

fn safe_name(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..8])
}

pub(crate) fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_replaces_punctuation() {
        assert_eq!(safe_name("News Site #1"), "News_Site__1");
        assert_eq!(safe_name("plain"), "plain");
    }

    #[test]
    fn url_hash_is_sixteen_hex_chars() {
        let hash = url_hash("https://example.com/a");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(hash, url_hash("https://example.com/a"));
        assert_ne!(hash, url_hash("https://example.com/b"));
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }
}
