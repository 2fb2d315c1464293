//! Chat transport over the Telegram Bot API.

pub mod dispatch;
pub mod telegram;

pub use dispatch::{ChatQueues, Dispatcher};
pub use telegram::TelegramClient;
