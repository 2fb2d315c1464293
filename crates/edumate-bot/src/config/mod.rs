//! Configuration loading and resolution.
//!
//! Every setting resolves as command-line flag, then environment variable,
//! then default.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use edumate_attendance::ExtractionConfig;

use crate::types::{BotError, BotResult};

pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const USERS_FILE_ENV: &str = "EDUMATE_USERS_FILE";
pub const SCREENSHOT_DIR_ENV: &str = "EDUMATE_SCREENSHOT_DIR";
pub const PORTAL_URL_ENV: &str = "EDUMATE_PORTAL_URL";
pub const API_BASE_ENV: &str = "TELEGRAM_API_BASE";

pub const DEFAULT_USERS_FILE: &str = "users.json";
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll wait passed to `getUpdates`.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

const PLACEHOLDER_TOKEN: &str = "YOUR_BOT_TOKEN_HERE";

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub token: Option<String>,
    pub users_file: Option<String>,
    pub screenshot_dir: Option<String>,
    pub chromium: Option<String>,
    pub portal_url: Option<String>,
}

/// Fully resolved process configuration.
#[derive(Clone)]
pub struct BotConfig {
    pub token: String,
    pub users_file: PathBuf,
    pub screenshot_dir: PathBuf,
    pub chromium: Option<PathBuf>,
    pub portal_url: Option<String>,
    pub api_base: String,
    pub poll_timeout: Duration,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("users_file", &self.users_file)
            .field("screenshot_dir", &self.screenshot_dir)
            .field("chromium", &self.chromium)
            .field("portal_url", &self.portal_url)
            .field("api_base", &self.api_base)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl BotConfig {
    /// Resolve from flags and the process environment. Fails when no usable
    /// bot token is available.
    pub fn resolve(overrides: &Overrides) -> BotResult<Self> {
        Ok(Self {
            token: resolve_token(overrides.token.as_deref())?,
            users_file: resolve_users_file(overrides.users_file.as_deref()),
            screenshot_dir: resolve_screenshot_dir(overrides.screenshot_dir.as_deref()),
            chromium: overrides.chromium.as_ref().map(PathBuf::from),
            portal_url: first_set(overrides.portal_url.as_deref(), env(PORTAL_URL_ENV)),
            api_base: first_set(None, env(API_BASE_ENV))
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        })
    }

    /// Engine settings derived from this configuration.
    pub fn extraction_config(&self) -> ExtractionConfig {
        ExtractionConfig {
            screenshot_dir: self.screenshot_dir.clone(),
            portal_base: self.portal_url.clone(),
            ..ExtractionConfig::default()
        }
    }
}

/// Resolve the bot token from the flag or `TELEGRAM_BOT_TOKEN`.
pub fn resolve_token(explicit: Option<&str>) -> BotResult<String> {
    validate_token(first_set(explicit, env(TOKEN_ENV)))
}

/// Reject a missing, blank, or placeholder token.
pub fn validate_token(raw: Option<String>) -> BotResult<String> {
    let token = raw.map(|t| t.trim().to_string()).unwrap_or_default();
    if token.is_empty() {
        return Err(BotError::Config(format!(
            "no bot token: pass --token or set {TOKEN_ENV}"
        )));
    }
    if token == PLACEHOLDER_TOKEN {
        return Err(BotError::Config(format!(
            "bot token is still the placeholder {PLACEHOLDER_TOKEN}"
        )));
    }
    Ok(token)
}

/// Resolve the registry file path.
pub fn resolve_users_file(explicit: Option<&str>) -> PathBuf {
    first_set(explicit, env(USERS_FILE_ENV))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_USERS_FILE))
}

/// Resolve the directory for failure screenshots.
pub fn resolve_screenshot_dir(explicit: Option<&str>) -> PathBuf {
    first_set(explicit, env(SCREENSHOT_DIR_ENV))
        .map(PathBuf::from)
        .unwrap_or_else(|| ExtractionConfig::default().screenshot_dir)
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// First non-blank value, flag before environment.
fn first_set(explicit: Option<&str>, from_env: Option<String>) -> Option<String> {
    explicit
        .map(str::to_string)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| from_env.filter(|v| !v.trim().is_empty()))
}
