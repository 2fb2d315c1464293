//! Outbound chat primitives the conversation coordinator depends on.

use std::path::Path;

use async_trait::async_trait;

use crate::types::{AttendanceResult, ChatId, MessageId};

/// How message text should be interpreted by the chat client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    /// `*bold*` and `_italic_` emphasis.
    Markdown,
}

/// Minimal chat client surface. Implementations wrap a concrete protocol.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message; returns the id of the sent message.
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        format: TextFormat,
    ) -> AttendanceResult<MessageId>;

    /// Replace the text of a previously sent message.
    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        format: TextFormat,
    ) -> AttendanceResult<()>;

    /// Remove a message from the chat transcript.
    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> AttendanceResult<()>;

    /// Upload an image file as a photo.
    async fn send_photo(&self, chat_id: ChatId, path: &Path) -> AttendanceResult<MessageId>;
}
