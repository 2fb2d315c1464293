//! Portal hosts, selectors, and diagnostic artifact naming.

use std::path::{Path, PathBuf};

use url::Url;

use crate::types::{AttendanceError, AttendanceResult};

/// Portal used by everyone outside the institute-of-technology domain.
pub const DEFAULT_PORTAL: &str = "https://student.sairam.edu.in/";

/// Portal for institute-of-technology accounts.
pub const ALTERNATE_PORTAL: &str = "https://student.sairamit.edu.in/";

/// Email fragment that always selects the alternate portal.
const ALTERNATE_DOMAIN: &str = "sairamit.edu.in";

/// Local-part fragment that selects the alternate portal.
const ALTERNATE_LOCAL_MARKER: &str = "sit";

pub const EMAIL_INPUT: &str = r#"input[placeholder="Email"]"#;
pub const PASSWORD_INPUT: &str = r#"input[placeholder="*********"]"#;
pub const SUBMIT_BUTTON: &str = "button.bg-btnPrimary";
pub const PROFILE_LINK: &str = r#"a[href="/me"]"#;
pub const ATTENDANCE_TAB_TEXT: &str = "Attendance";
pub const CHART_CONTAINER: &str = ".recharts-wrapper";

pub const DASHBOARD_URL: &str = "**/dashboard";
pub const PROFILE_URL: &str = "**/me*";

/// Which portal host a student belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalTarget {
    login: String,
    profile: String,
}

impl PortalTarget {
    /// Resolve the portal from the email alone; no network access.
    pub fn resolve(email: &str) -> Self {
        let local = email.split('@').next().unwrap_or_default();
        let base = if local.contains(ALTERNATE_LOCAL_MARKER) || email.contains(ALTERNATE_DOMAIN) {
            ALTERNATE_PORTAL
        } else {
            DEFAULT_PORTAL
        };
        Self {
            login: base.to_string(),
            profile: format!("{base}me"),
        }
    }

    /// Use an explicit base URL (a mirror or a local test server).
    pub fn from_base(base: &str) -> AttendanceResult<Self> {
        let invalid = |e: url::ParseError| {
            AttendanceError::InvalidInput(format!("bad portal URL {base}: {e}"))
        };
        let url = Url::parse(base).map_err(invalid)?;
        let profile = url.join("/me").map_err(invalid)?;
        Ok(Self {
            login: url.to_string(),
            profile: profile.to_string(),
        })
    }

    /// Login page URL.
    pub fn login_url(&self) -> &str {
        &self.login
    }

    /// Direct URL of the profile ("me") section on the same host.
    pub fn profile_url(&self) -> &str {
        &self.profile
    }
}

/// Why an attempt left a screenshot behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Login,
    Profile,
    Tab,
    Exception,
}

impl FailureKind {
    fn suffix(self) -> &'static str {
        match self {
            FailureKind::Login => "",
            FailureKind::Profile => "_profile",
            FailureKind::Tab => "_tab",
            FailureKind::Exception => "_exception",
        }
    }
}

/// Deterministic screenshot path for an email and failure category.
pub fn screenshot_path(dir: &Path, email: &str, kind: FailureKind) -> PathBuf {
    let safe: String = email
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("error_{safe}{}.png", kind.suffix()))
}
