//! Chromium-based renderer using chromiumoxide.
//!
//! Every context launches its own headless browser with a throwaway profile
//! directory, so concurrent chats never share cookies or storage.

use super::{NavigationResult, RenderContext, Renderer, UrlPattern};
use crate::types::{AttendanceError, AttendanceResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Delay between polls while waiting for a selector, text, or URL.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. EDUMATE_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("EDUMATE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.edumate/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".edumate/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".edumate/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".edumate/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".edumate/chromium/chrome-linux64/chrome"),
                home.join(".edumate/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

fn cdp(e: CdpError) -> AttendanceError {
    AttendanceError::Browser(e.to_string())
}

/// Re-run `check` until it yields `Some` or `timeout` elapses.
async fn poll_until<T, F, Fut>(what: &str, timeout: Duration, mut check: F) -> AttendanceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = check().await {
            return Ok(found);
        }
        if Instant::now() >= deadline {
            return Err(AttendanceError::timeout(what, timeout));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    chrome_path: PathBuf,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Create a renderer for the given binary, or the one `find_chromium`
    /// locates.
    pub fn new(chrome_path: Option<PathBuf>) -> AttendanceResult<Self> {
        let chrome_path = chrome_path.or_else(find_chromium).ok_or_else(|| {
            AttendanceError::Browser(
                "Chromium not found. Set EDUMATE_CHROMIUM_PATH or install google-chrome."
                    .to_string(),
            )
        })?;

        Ok(Self {
            chrome_path,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn chrome_path(&self) -> &Path {
        &self.chrome_path
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> AttendanceResult<Box<dyn RenderContext>> {
        let profile = tempfile::Builder::new()
            .prefix("edumate-profile-")
            .tempdir()?;

        let config = BrowserConfig::builder()
            .chrome_executable(&self.chrome_path)
            .user_data_dir(profile.path())
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| AttendanceError::Browser(format!("failed to build browser config: {e}")))?;

        let (mut browser, mut handler) = Browser::launch(config).await.map_err(cdp)?;

        // Drive the CDP event stream for as long as the browser lives
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(cdp(e));
            }
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(chrome = %self.chrome_path.display(), "browser session opened");

        Ok(Box::new(ChromiumContext {
            browser: Some(browser),
            page: Some(page),
            handler_task: Some(handler_task),
            _profile: profile,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium browser with one page.
pub struct ChromiumContext {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    // Removed from disk when the context is dropped.
    _profile: tempfile::TempDir,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    fn page(&self) -> AttendanceResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| AttendanceError::Browser("browser session already closed".to_string()))
    }
}

/// Click the innermost visible element containing the needle. The needle is
/// embedded as a JSON string literal.
fn click_text_script(text: &str) -> String {
    let needle = serde_json::to_string(&text.to_lowercase()).unwrap_or_else(|_| "\"\"".into());
    format!(
        r#"(() => {{
            const needle = {needle};
            const has = el => (el.innerText || '').toLowerCase().includes(needle);
            const visible = el => el.offsetParent !== null || el.getClientRects().length > 0;
            const hits = [...document.querySelectorAll('body *')]
                .filter(el => visible(el) && has(el) && ![...el.children].some(has));
            if (!hits.length) return false;
            hits[0].click();
            return true;
        }})()"#
    )
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> AttendanceResult<NavigationResult> {
        let page = self.page()?;
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => Err(AttendanceError::Browser(format!("navigation failed: {e}"))),
            Err(_) => Err(AttendanceError::timeout(format!("navigation to {url}"), timeout)),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> AttendanceResult<()> {
        let page = self.page()?;
        poll_until(&format!("selector {selector}"), timeout, move || async move {
            page.find_element(selector).await.ok().map(|_| ())
        })
        .await
    }

    async fn fill(&self, selector: &str, value: &str) -> AttendanceResult<()> {
        let page = self.page()?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|_| AttendanceError::ElementNotFound(selector.to_string()))?;
        element.click().await.map_err(cdp)?;
        element.type_str(value).await.map_err(cdp)?;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> AttendanceResult<()> {
        let page = self.page()?;
        let element = poll_until(&format!("selector {selector}"), timeout, move || async move {
            page.find_element(selector).await.ok()
        })
        .await?;
        element.click().await.map_err(cdp)?;
        Ok(())
    }

    async fn click_text(&self, text: &str, timeout: Duration) -> AttendanceResult<()> {
        let page = self.page()?;
        let script = click_text_script(text);
        let script = script.as_str();
        poll_until(&format!("text {text:?}"), timeout, move || async move {
            let clicked = page
                .evaluate(script)
                .await
                .ok()
                .and_then(|r| r.into_value::<bool>().ok())
                .unwrap_or(false);
            clicked.then_some(())
        })
        .await
    }

    async fn wait_for_url(&self, pattern: &UrlPattern, timeout: Duration) -> AttendanceResult<String> {
        let page = self.page()?;
        poll_until(&format!("url {pattern}"), timeout, move || async move {
            page.url()
                .await
                .ok()
                .flatten()
                .filter(|current| pattern.matches(current))
        })
        .await
    }

    async fn get_html(&self) -> AttendanceResult<String> {
        let result = self
            .page()?
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(cdp)?;

        result
            .into_value::<String>()
            .map_err(|e| AttendanceError::Browser(format!("failed to convert HTML result: {e}")))
    }

    async fn screenshot(&self, path: &Path) -> AttendanceResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.page()?
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(cdp)?;
        Ok(())
    }

    async fn close(&mut self) -> AttendanceResult<()> {
        let Some(page) = self.page.take() else {
            return Ok(());
        };
        self.active_count.fetch_sub(1, Ordering::Relaxed);

        let _ = page.close().await;
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!("browser close failed: {e}");
            }
            let _ = browser.wait().await;
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        tracing::debug!("browser session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_text_script_escapes_needle() {
        let script = click_text_script("Attend\"ance");
        assert!(script.contains(r#"const needle = "attend\"ance";"#));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_session_lifecycle() {
        let renderer = ChromiumRenderer::new(None).expect("failed to create renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");
        assert_eq!(renderer.active_contexts(), 1);

        ctx.navigate(
            "data:text/html,<div><span>OD %</span><svg><text>5%</text></svg></div><button>Attendance</button>",
            Duration::from_secs(10),
        )
        .await
        .expect("navigation failed");

        ctx.wait_for_selector("svg text", Duration::from_secs(5))
            .await
            .expect("selector never appeared");
        ctx.click_text("attendance", Duration::from_secs(5))
            .await
            .expect("text click failed");

        let html = ctx.get_html().await.expect("get_html failed");
        assert!(html.contains("OD %"));

        let err = ctx
            .wait_for_selector(".missing", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.is_selector_miss());

        ctx.close().await.expect("close failed");
        ctx.close().await.expect("second close must be a no-op");
        assert_eq!(renderer.active_contexts(), 0);
    }
}
