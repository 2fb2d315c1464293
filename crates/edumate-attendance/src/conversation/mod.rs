//! Conversation coordinator — one state machine per chat.
//!
//! Collects the email on first contact, asks for the password on every
//! fetch, runs the extractor, and turns its outcome into chat messages.
//! Passwords exist only inside [`Credentials`] for the length of one
//! extraction; the message that carried one is deleted before the
//! extraction starts.

pub mod messages;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::extraction::Extractor;
use crate::registry::UserRegistry;
use crate::transport::{ChatTransport, TextFormat};
use crate::types::{
    AttendanceError, AttendanceResult, ChatId, ChatState, Command, Credentials,
    ExtractionOutcome, InboundEvent, MessageId, Password, Payload,
};

pub use session::SessionStore;

/// Routes inbound events through the per-chat state machine.
pub struct Coordinator {
    transport: Arc<dyn ChatTransport>,
    registry: Arc<dyn UserRegistry>,
    extractor: Arc<dyn Extractor>,
    sessions: Arc<SessionStore>,
}

impl Coordinator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: Arc<dyn UserRegistry>,
        extractor: Arc<dyn Extractor>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            transport,
            registry,
            extractor,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one inbound event. Events for the same chat are processed one
    /// at a time; the chat's state lock is held until this returns.
    pub async fn handle(&self, event: InboundEvent) -> AttendanceResult<()> {
        let chat = event.chat_id;
        let mut state = self.sessions.acquire(chat).await;
        debug!(%chat, state = ?*state, payload = ?event.payload, "inbound message");

        match event.payload {
            Payload::Command(Command::Start) => self.start(chat, &mut state).await,
            Payload::Command(Command::Attendance) => {
                self.request_password(chat, &mut state).await
            }
            Payload::Command(Command::Help) => self.reply(chat, messages::HELP).await,
            Payload::Command(Command::Unknown(name)) => {
                debug!(%chat, command = %name, "unknown command");
                self.reply(chat, messages::NOT_UNDERSTOOD).await
            }
            Payload::Text(text) => {
                self.on_text(chat, event.message_id, text, &mut state)
                    .await
            }
        }
    }

    async fn start(&self, chat: ChatId, state: &mut ChatState) -> AttendanceResult<()> {
        match self.registry.lookup(chat).await {
            Ok(Some(email)) => {
                *state = ChatState::Idle;
                self.reply(chat, &messages::welcome_back(&email)).await
            }
            Ok(None) => {
                *state = ChatState::AwaitingEmail;
                self.reply_markdown(chat, messages::WELCOME_NEW).await
            }
            Err(e) => {
                *state = ChatState::Idle;
                self.registry_failed(chat, e).await
            }
        }
    }

    async fn request_password(&self, chat: ChatId, state: &mut ChatState) -> AttendanceResult<()> {
        match self.registry.lookup(chat).await {
            Ok(Some(_)) => {
                *state = ChatState::AwaitingPassword;
                self.reply_markdown(chat, messages::PASSWORD_PROMPT).await
            }
            Ok(None) => {
                *state = ChatState::Idle;
                self.reply(chat, messages::NOT_REGISTERED).await
            }
            Err(e) => {
                *state = ChatState::Idle;
                self.registry_failed(chat, e).await
            }
        }
    }

    async fn on_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: String,
        state: &mut ChatState,
    ) -> AttendanceResult<()> {
        match *state {
            ChatState::AwaitingEmail => {
                let email = text.trim();
                if !email.contains('@') {
                    return self.reply(chat, messages::INVALID_EMAIL).await;
                }
                // Stays in AwaitingEmail on failure so the user can resend.
                if let Err(e) = self.registry.save(chat, email).await {
                    return self.registry_failed(chat, e).await;
                }
                *state = ChatState::AwaitingPassword;
                self.reply_markdown(chat, &messages::email_saved(email))
                    .await
            }
            ChatState::AwaitingPassword => {
                let password = Password::new(text.trim());
                drop(text);
                self.fetch(chat, message_id, password, state).await
            }
            ChatState::Idle => {
                if text.trim().eq_ignore_ascii_case("attendance") {
                    self.request_password(chat, state).await
                } else {
                    self.reply(chat, messages::NOT_UNDERSTOOD).await
                }
            }
        }
    }

    async fn fetch(
        &self,
        chat: ChatId,
        message_id: MessageId,
        password: Password,
        state: &mut ChatState,
    ) -> AttendanceResult<()> {
        // Leave AwaitingPassword first so no path can reuse this state.
        *state = ChatState::Idle;

        if let Err(e) = self.transport.delete_message(chat, message_id).await {
            warn!(%chat, "could not delete password message: {e}");
        }

        let email = match self.registry.lookup(chat).await {
            Ok(Some(email)) => email,
            Ok(None) => return self.reply(chat, messages::MISSING_REGISTRATION).await,
            Err(e) => {
                error!(%chat, "registry lookup failed: {e}");
                return self.reply(chat, messages::MISSING_REGISTRATION).await;
            }
        };

        let status = self
            .transport
            .send_text(chat, messages::FETCHING, TextFormat::Plain)
            .await?;

        info!(%chat, email = %email, "fetching attendance");
        let credentials = Credentials::new(email, password);
        let extractor = Arc::clone(&self.extractor);
        let outcome = match tokio::spawn(async move { extractor.extract(&credentials).await }).await
        {
            Ok(outcome) => outcome,
            Err(e) => ExtractionOutcome::HardFailure {
                cause: AttendanceError::Internal(format!("extraction task failed: {e}")),
                screenshot: None,
            },
        };

        self.deliver(chat, status, outcome).await
    }

    /// Replace the status message with the outcome and handle the screenshot.
    async fn deliver(
        &self,
        chat: ChatId,
        status: MessageId,
        outcome: ExtractionOutcome,
    ) -> AttendanceResult<()> {
        match outcome {
            ExtractionOutcome::Success(report) => {
                info!(%chat, email = %report.email, "attendance fetched");
                self.transport
                    .edit_text(
                        chat,
                        status,
                        &messages::report_summary(&report),
                        TextFormat::Markdown,
                    )
                    .await
            }
            ExtractionOutcome::SoftFailure {
                message,
                screenshot,
            } => {
                warn!(%chat, "extraction failed: {message}");
                let edited = self
                    .transport
                    .edit_text(
                        chat,
                        status,
                        &messages::soft_failure(&message, screenshot.is_some()),
                        TextFormat::Plain,
                    )
                    .await;
                if let Some(path) = screenshot {
                    self.send_screenshot(chat, &path).await;
                }
                edited
            }
            ExtractionOutcome::HardFailure { cause, screenshot } => {
                error!(%chat, "extraction error: {cause}");
                if let Some(path) = screenshot {
                    remove_screenshot(&path).await;
                }
                self.transport
                    .edit_text(
                        chat,
                        status,
                        &messages::hard_failure(&cause.to_string()),
                        TextFormat::Plain,
                    )
                    .await
            }
        }
    }

    /// Upload the screenshot if it exists, then delete it either way.
    async fn send_screenshot(&self, chat: ChatId, path: &Path) {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            if let Err(e) = self.transport.send_photo(chat, path).await {
                warn!(%chat, "could not send screenshot: {e}");
            }
        }
        remove_screenshot(path).await;
    }

    async fn registry_failed(&self, chat: ChatId, err: AttendanceError) -> AttendanceResult<()> {
        error!(%chat, "registry unavailable: {err}");
        self.reply(chat, messages::TRY_AGAIN).await
    }

    async fn reply(&self, chat: ChatId, text: &str) -> AttendanceResult<()> {
        self.transport
            .send_text(chat, text, TextFormat::Plain)
            .await
            .map(|_| ())
    }

    async fn reply_markdown(&self, chat: ChatId, text: &str) -> AttendanceResult<()> {
        self.transport
            .send_text(chat, text, TextFormat::Markdown)
            .await
            .map(|_| ())
    }
}

async fn remove_screenshot(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed screenshot"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "could not remove screenshot: {e}"),
    }
}
