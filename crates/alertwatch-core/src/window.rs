//! Query time window.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Inclusive time range `[start, end]` queried by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The window of length `lookback` ending at `now`.
    ///
    /// A lookback too large to represent saturates at the earliest
    /// representable instant.
    pub fn ending_at(now: DateTime<Utc>, lookback: Duration) -> Self {
        let start = chrono::Duration::from_std(lookback)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: now }
    }

    /// Lower bound formatted for a range query.
    pub fn start_rfc3339(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Upper bound formatted for a range query.
    pub fn end_rfc3339(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
