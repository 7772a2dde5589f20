//! Core types for the alertwatch notification pipeline.
//!
//! This crate provides:
//! - The canonical [`Alert`] record and its notification formatting
//! - [`normalize`], mapping raw detection-engine documents to alerts
//! - [`TimeWindow`], the range queried by each run
//! - Prometheus metrics helpers
//! - Shared error types

mod alert;
mod error;
pub mod metrics;
pub mod normalize;
mod window;

pub use alert::{Alert, RawAlert, Severity};
pub use error::{Error, NormalizeError, Result};
pub use normalize::normalize;
pub use window::TimeWindow;
