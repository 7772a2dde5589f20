//! alertwatch notification pipeline.
//!
//! Polls a detection-alert index for open alerts, sends each alert that has
//! not been notified before to a Telegram chat, and records what was sent.
//!
//! # Modules
//!
//! - [`source`] - Alert source adapters (Elasticsearch)
//! - [`notifier`] - Notification sinks (Telegram)
//! - [`dedupe`] - Persistent record of notified alert identifiers
//! - [`pipeline`] - The per-run orchestrator
//! - [`config`] - Environment-driven configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   AlertSource   │  Elasticsearch scroll over [now - lookback, now]
//! └────────┬────────┘
//!          │ raw documents
//!          ▼
//! ┌─────────────────┐
//! │    normalize    │  open alerts only
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   DedupeStore   │  skip identifiers already notified
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Notifier     │  one message per alert, in order
//! └────────┬────────┘
//!          │ delivered identifiers
//!          ▼
//! ┌─────────────────┐
//! │   DedupeStore   │  append
//! └─────────────────┘
//! ```

pub mod config;
pub mod dedupe;
pub mod error;
pub mod notifier;
pub mod pipeline;
pub mod source;

// Re-export commonly used types at crate root
pub use config::Config;
pub use error::{Error, Result};

pub use dedupe::{DedupeBackend, DedupeStore, FileDedupeStore, RocksDedupeStore, open_store};
pub use notifier::{Notifier, TelegramConfig, TelegramNotifier};
pub use pipeline::{DedupeLoadPolicy, Pipeline, RunFailure, RunReport};
pub use source::{AlertSource, AlertStream, ElasticConfig, ElasticSource};
