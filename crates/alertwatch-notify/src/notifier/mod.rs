//! Notification sinks.
//!
//! - [`TelegramNotifier`] - Telegram Bot API `sendMessage`

mod telegram;

pub use telegram::{TelegramConfig, TelegramNotifier};

use crate::Result;
use async_trait::async_trait;

/// Delivers one formatted message to a fixed destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Human-readable name for this sink (used in logs).
    fn name(&self) -> &'static str;

    /// Deliver `message` and wait for the destination to confirm it.
    async fn send(&self, message: &str) -> Result<()>;
}
