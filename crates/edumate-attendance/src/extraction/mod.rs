//! Extraction engine — logs into the portal and reads attendance and OD.
//!
//! One call to [`Extractor::extract`] drives a fresh browser session through
//! login, the profile section, and the attendance tab, then reads both
//! percentages from the rendered charts. The session is closed before the
//! call returns, whatever the outcome.

pub mod labels;
pub mod portal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::renderer::{RenderContext, Renderer, UrlPattern};
use crate::types::{
    AttendanceReport, AttendanceResult, Credentials, ExtractionOutcome, MetricValue,
};

use self::portal::{FailureKind, PortalTarget};

pub const LOGIN_FAILED: &str = "Login failed. Check password or try again.";
pub const PROFILE_UNREACHABLE: &str = "Could not open the profile section.";
pub const TAB_MISSING: &str = "Could not find Attendance tab.";

/// Per-step waits. Every browser wait in the flow is bounded by one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionTimeouts {
    /// Page loads (login page, direct profile URL).
    pub navigation: Duration,
    /// Email field appearing and the submit button becoming clickable.
    pub email_input: Duration,
    /// Redirect to the dashboard after submitting credentials.
    pub login_redirect: Duration,
    /// Finding the profile link before falling back to the direct URL.
    pub profile_link: Duration,
    /// Redirect to the profile section.
    pub profile_redirect: Duration,
    /// Finding the attendance tab.
    pub attendance_tab: Duration,
    /// Charts rendering; a miss here is not fatal.
    pub charts: Duration,
}

impl Default for ExtractionTimeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            email_input: Duration::from_secs(30),
            login_redirect: Duration::from_secs(15),
            profile_link: Duration::from_secs(10),
            profile_redirect: Duration::from_secs(15),
            attendance_tab: Duration::from_secs(5),
            charts: Duration::from_secs(15),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub timeouts: ExtractionTimeouts,
    /// Where failure screenshots are written.
    pub screenshot_dir: PathBuf,
    /// Fixed portal base URL; when unset the portal is resolved per email.
    pub portal_base: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeouts: ExtractionTimeouts::default(),
            screenshot_dir: std::env::temp_dir().join("edumate-attendance"),
            portal_base: None,
        }
    }
}

/// Anything that can turn credentials into an extraction outcome.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Run one attempt. Never fails outright: unexpected errors come back
    /// as [`ExtractionOutcome::HardFailure`].
    async fn extract(&self, credentials: &Credentials) -> ExtractionOutcome;
}

/// Browser-driven extractor for the student portal.
pub struct ExtractionEngine {
    renderer: Arc<dyn Renderer>,
    config: ExtractionConfig,
}

impl ExtractionEngine {
    pub fn new(renderer: Arc<dyn Renderer>, config: ExtractionConfig) -> Self {
        Self { renderer, config }
    }

    fn target(&self, email: &str) -> AttendanceResult<PortalTarget> {
        match &self.config.portal_base {
            Some(base) => PortalTarget::from_base(base),
            None => Ok(PortalTarget::resolve(email)),
        }
    }

    async fn run(
        &self,
        ctx: &mut dyn RenderContext,
        target: &PortalTarget,
        credentials: &Credentials,
    ) -> AttendanceResult<ExtractionOutcome> {
        let t = &self.config.timeouts;
        let email = credentials.email.as_str();

        // 1. Login
        info!(email, url = target.login_url(), "navigating to portal");
        let nav = ctx.navigate(target.login_url(), t.navigation).await?;
        debug!(email, url = %nav.final_url, load_time_ms = nav.load_time_ms, "login page loaded");

        info!(email, "logging in");
        ctx.wait_for_selector(portal::EMAIL_INPUT, t.email_input).await?;
        ctx.fill(portal::EMAIL_INPUT, email).await?;
        ctx.fill(portal::PASSWORD_INPUT, credentials.password.expose())
            .await?;
        ctx.click(portal::SUBMIT_BUTTON, t.email_input).await?;

        let dashboard = UrlPattern::new(portal::DASHBOARD_URL)?;
        match ctx.wait_for_url(&dashboard, t.login_redirect).await {
            Ok(_) => info!(email, "login successful"),
            Err(e) if e.is_selector_miss() => {
                error!(email, "login failed or timed out: {e}");
                return Ok(self
                    .soft_failure(ctx, email, FailureKind::Login, LOGIN_FAILED)
                    .await);
            }
            Err(e) => return Err(e),
        }

        // 2. Profile section
        info!(email, "navigating to profile section");
        if let Err(e) = ctx.click(portal::PROFILE_LINK, t.profile_link).await {
            warn!(email, "could not click profile link ({e}), trying direct navigation");
            let nav = ctx.navigate(target.profile_url(), t.navigation).await?;
            debug!(email, url = %nav.final_url, load_time_ms = nav.load_time_ms, "profile page loaded");
        }

        let profile = UrlPattern::new(portal::PROFILE_URL)?;
        match ctx.wait_for_url(&profile, t.profile_redirect).await {
            Ok(_) => {}
            Err(e) if e.is_selector_miss() => {
                error!(email, "profile section did not load: {e}");
                return Ok(self
                    .soft_failure(ctx, email, FailureKind::Profile, PROFILE_UNREACHABLE)
                    .await);
            }
            Err(e) => return Err(e),
        }

        // 3. Attendance tab
        info!(email, "switching to attendance tab");
        match ctx
            .click_text(portal::ATTENDANCE_TAB_TEXT, t.attendance_tab)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_selector_miss() => {
                error!(email, "could not find attendance tab: {e}");
                return Ok(self
                    .soft_failure(ctx, email, FailureKind::Tab, TAB_MISSING)
                    .await);
            }
            Err(e) => return Err(e),
        }

        match ctx.wait_for_selector(portal::CHART_CONTAINER, t.charts).await {
            Ok(()) => {}
            Err(e) if e.is_selector_miss() => {
                warn!(email, "charts did not load, possibly no data");
            }
            Err(e) => return Err(e),
        }

        // 4. Values
        info!(email, "extracting values");
        let (attendance, od) = match ctx.get_html().await {
            Ok(html) => labels::read_metrics(&html),
            Err(e) => {
                error!(email, "could not read page source: {e}");
                (MetricValue::NotAvailable, MetricValue::NotAvailable)
            }
        };

        Ok(ExtractionOutcome::Success(AttendanceReport {
            email: email.to_string(),
            attendance,
            od,
        }))
    }

    async fn soft_failure(
        &self,
        ctx: &dyn RenderContext,
        email: &str,
        kind: FailureKind,
        message: &str,
    ) -> ExtractionOutcome {
        ExtractionOutcome::SoftFailure {
            message: message.to_string(),
            screenshot: self.capture(ctx, email, kind).await,
        }
    }

    /// Best-effort screenshot; a failure here is logged and dropped.
    async fn capture(
        &self,
        ctx: &dyn RenderContext,
        email: &str,
        kind: FailureKind,
    ) -> Option<PathBuf> {
        let path = portal::screenshot_path(&self.config.screenshot_dir, email, kind);
        match ctx.screenshot(&path).await {
            Ok(()) => {
                info!(email, path = %path.display(), "saved failure screenshot");
                Some(path)
            }
            Err(e) => {
                warn!(email, "could not capture screenshot: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl Extractor for ExtractionEngine {
    async fn extract(&self, credentials: &Credentials) -> ExtractionOutcome {
        let email = credentials.email.as_str();
        info!(email, "starting extraction");

        let target = match self.target(email) {
            Ok(target) => target,
            Err(cause) => {
                return ExtractionOutcome::HardFailure {
                    cause,
                    screenshot: None,
                }
            }
        };

        let mut ctx = match self.renderer.new_context().await {
            Ok(ctx) => ctx,
            Err(cause) => {
                error!(email, "could not start browser: {cause}");
                return ExtractionOutcome::HardFailure {
                    cause,
                    screenshot: None,
                };
            }
        };

        let outcome = match self.run(&mut *ctx, &target, credentials).await {
            Ok(outcome) => outcome,
            Err(cause) => {
                error!(email, "extraction failed: {cause}");
                let screenshot = self
                    .capture(&*ctx, email, FailureKind::Exception)
                    .await;
                ExtractionOutcome::HardFailure { cause, screenshot }
            }
        };

        if let Err(e) = ctx.close().await {
            warn!(email, "browser close failed: {e}");
        }
        outcome
    }
}
