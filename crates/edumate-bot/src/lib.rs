//! Edumate Bot — Telegram front end for the attendance extractor.

pub mod config;
pub mod doctor;
pub mod transport;
pub mod types;

pub use config::{BotConfig, Overrides};
pub use transport::{Dispatcher, TelegramClient};
pub use types::{BotError, BotResult};
