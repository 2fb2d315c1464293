//! Renderer abstraction for browser-driven portal sessions.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). The extraction
//! engine only talks to these traits, so tests can script a fake browser.

pub mod chromium;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::types::{AttendanceError, AttendanceResult};

/// Result of navigating to a URL.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can open isolated sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a new browser session. Sessions never share cookies or storage.
    async fn new_context(&self) -> AttendanceResult<Box<dyn RenderContext>>;
    /// Number of sessions opened and not yet closed.
    fn active_contexts(&self) -> usize;
}

/// A single browser session driving one page.
///
/// Waiting operations take their timeout explicitly and fail with
/// [`AttendanceError::Timeout`] when it elapses.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> AttendanceResult<NavigationResult>;
    /// Wait until an element matching the CSS selector exists.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> AttendanceResult<()>;
    /// Focus the element matching the selector and type `value` into it.
    async fn fill(&self, selector: &str, value: &str) -> AttendanceResult<()>;
    /// Click the element matching the selector once it appears.
    async fn click(&self, selector: &str, timeout: Duration) -> AttendanceResult<()>;
    /// Click the innermost visible element whose text contains `text`
    /// (case-insensitive).
    async fn click_text(&self, text: &str, timeout: Duration) -> AttendanceResult<()>;
    /// Wait until the page URL matches `pattern`; returns the matching URL.
    async fn wait_for_url(&self, pattern: &UrlPattern, timeout: Duration) -> AttendanceResult<String>;
    /// Get the full page HTML.
    async fn get_html(&self) -> AttendanceResult<String>;
    /// Write a PNG screenshot of the page to `path`.
    async fn screenshot(&self, path: &Path) -> AttendanceResult<()>;
    /// Release the session. Calling it again is a no-op.
    async fn close(&mut self) -> AttendanceResult<()>;
}

/// A URL glob in the style of browser test runners.
///
/// `**` matches any sequence of characters, `*` matches any sequence
/// without `/`, everything else is literal.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    glob: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(glob: &str) -> AttendanceResult<Self> {
        let mut source = String::from("^");
        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    source.push_str(".*");
                } else {
                    source.push_str("[^/]*");
                }
            } else {
                source.push_str(&regex::escape(&c.to_string()));
            }
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| AttendanceError::InvalidInput(format!("bad URL pattern {glob}: {e}")))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.glob)
    }
}
