//! Telegram side of prbridge
//!
//! - [`TelegramClient`]: Bot API client, implements [`prbridge_core::ChatTransport`]
//! - [`UpdateHandler`]: long-polls updates and serves `/repos`, `/set_bb_email`
//!   and the subscription buttons

pub mod api;
pub mod client;
pub mod commands;
pub mod handler;

pub use client::{TelegramClient, TelegramConfig, DEFAULT_API_URL};
pub use commands::{CallbackAction, Command, SubscriptionCallback};
pub use handler::{UpdateHandler, LAST_UPDATE_ID_KEY};
