//! Error and Bot API wire types.

pub mod api;
pub mod error;

pub use api::{ApiResponse, Chat, Message, Update, User};
pub use error::{BotError, BotResult};
