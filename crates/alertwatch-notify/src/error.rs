//! Error types for the notification pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while polling, notifying or persisting state.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The alert store could not be reached.
    #[error("Source connection error: {0}")]
    SourceConnection(String),

    /// The alert store rejected a query or returned an unexpected response.
    #[error("Source query error: {0}")]
    SourceQuery(String),

    /// A notification could not be delivered.
    #[error("Notifier send error: {0}")]
    NotifierSend(String),

    /// Previously-notified identifiers could not be read.
    #[error("Dedupe load error: {0}")]
    DedupeLoad(String),

    /// Newly-notified identifiers could not be persisted.
    #[error("Dedupe commit error: {0}")]
    DedupeCommit(String),

    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Alert normalization or formatting error.
    #[error(transparent)]
    Alert(#[from] alertwatch_core::Error),
}
