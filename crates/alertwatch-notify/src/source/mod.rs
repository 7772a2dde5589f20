//! Alert source adapters.
//!
//! A source turns a [`TimeWindow`] into a lazy stream of raw alert documents.
//! The pipeline normalizes and deduplicates whatever the source yields.
//!
//! # Available Sources
//!
//! - [`ElasticSource`] - Elasticsearch scroll search over the detection-engine
//!   signal indices

mod elastic;

pub use elastic::{ElasticConfig, ElasticSource};

use crate::Result;
use alertwatch_core::{RawAlert, TimeWindow};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Finite, single-pass stream of raw alert documents.
///
/// An `Err` item means the remainder of the window could not be read.
pub type AlertStream = BoxStream<'static, Result<RawAlert>>;

/// A queryable store of detection alerts.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Start a query over `window`.
    ///
    /// Connection and authentication failures are returned here, before any
    /// document is produced. Later pages are fetched as the stream is polled.
    async fn fetch(&self, window: TimeWindow) -> Result<AlertStream>;
}
