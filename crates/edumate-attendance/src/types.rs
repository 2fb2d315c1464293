//! Core data types for credentials, chat identities, and extraction outcomes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Text shown in place of a metric that could not be read.
pub const NOT_AVAILABLE: &str = "N/A";

/// Opaque per-conversation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single message within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A portal password. Lives in memory for one extraction and is never
/// serialized or printed.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the secret for typing into the login form.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Email + password pair for a single extraction attempt.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: Password,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: Password) -> Self {
        Self {
            email: email.into(),
            password,
        }
    }
}

/// A percentage read from the attendance charts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Value(String),
    NotAvailable,
}

impl MetricValue {
    /// Wrap raw chart text; blank text counts as missing.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            MetricValue::NotAvailable
        } else {
            MetricValue::Value(trimmed.to_string())
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, MetricValue::Value(_))
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Value(v) => f.write_str(v),
            MetricValue::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

/// Values extracted from a successful portal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub email: String,
    pub attendance: MetricValue,
    pub od: MetricValue,
}

/// Result of one extraction attempt. Exactly one variant is produced per
/// attempt, after the browser session has been released.
#[derive(Debug)]
pub enum ExtractionOutcome {
    /// Both metrics were looked up (either may be `N/A`).
    Success(AttendanceReport),
    /// Anticipated failure with a user-facing message.
    SoftFailure {
        message: String,
        screenshot: Option<PathBuf>,
    },
    /// Unanticipated failure, reported after best-effort diagnostics.
    HardFailure {
        cause: AttendanceError,
        screenshot: Option<PathBuf>,
    },
}

/// Conversation state of a single chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingEmail,
    AwaitingPassword,
}

/// Bot commands understood by the conversation coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Attendance,
    Help,
    Unknown(String),
}

impl Command {
    /// Map a command name (without the leading `/`) to a command.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "attendance" => Command::Attendance,
            "help" => Command::Help,
            _ => Command::Unknown(name.to_string()),
        }
    }
}

/// What an inbound message carries.
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    Command(Command),
    Text(String),
}

// Text may be a password, so only its length is printed.
impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Command(c) => f.debug_tuple("Command").field(c).finish(),
            Payload::Text(t) => write!(f, "Text(<{} chars>)", t.chars().count()),
        }
    }
}

/// A message delivered by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub payload: Payload,
}

/// Errors that can occur in the attendance library.
#[derive(thiserror::Error, Debug)]
pub enum AttendanceError {
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Timed out after {}ms waiting for {what}", .after.as_millis())]
    Timeout { what: String, after: Duration },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AttendanceError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        AttendanceError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Timeouts and missing elements are the selector-level misses that the
    /// engine may turn into soft failures.
    pub fn is_selector_miss(&self) -> bool {
        matches!(
            self,
            AttendanceError::Timeout { .. } | AttendanceError::ElementNotFound(_)
        )
    }
}

/// Convenience result type.
pub type AttendanceResult<T> = Result<T, AttendanceError>;
