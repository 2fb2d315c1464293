//! Error types for the bot process.

use edumate_attendance::AttendanceError;

/// All errors that can occur in the bot process.
#[derive(thiserror::Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Telegram API error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Attendance(#[from] AttendanceError),
}

impl BotError {
    /// Wrap a reqwest error, dropping the request URL (it embeds the token).
    pub fn http(err: reqwest::Error) -> Self {
        BotError::Http(err.without_url())
    }

    /// The API refused the token; retrying cannot help.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BotError::Api { code: 401 | 404, .. })
    }

    /// Server-requested delay before the next call, in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            BotError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<BotError> for AttendanceError {
    fn from(err: BotError) -> Self {
        match err {
            BotError::Attendance(inner) => inner,
            BotError::Io(io) => AttendanceError::Io(io),
            other => AttendanceError::Transport(other.to_string()),
        }
    }
}

/// Convenience result type.
pub type BotResult<T> = Result<T, BotError>;
