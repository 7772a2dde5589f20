//! The per-run alert pipeline.
//!
//! ```text
//! [AlertSource] → normalize → [DedupeStore] filter → [Notifier] → [DedupeStore] commit
//! ```
//!
//! A run reads the whole window before delivering anything. If the source
//! fails part-way, nothing is sent and nothing is committed; the next run
//! reprocesses the same window. Once delivery starts, each alert is sent in
//! source order and its identifier is committed only if the send succeeded.

use crate::dedupe::DedupeStore;
use crate::notifier::Notifier;
use crate::source::AlertSource;
use crate::{Error, Result};
use alertwatch_core::metrics as m;
use alertwatch_core::{Alert, TimeWindow, normalize};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Behaviour when the dedupe store cannot be read at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupeLoadPolicy {
    /// Abort the run; nothing is sent.
    #[default]
    Abort,
    /// Continue as if no alert had ever been notified. Every open alert in
    /// the window will be sent again.
    TreatAsEmpty,
}

impl std::str::FromStr for DedupeLoadPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "empty" => Ok(Self::TreatAsEmpty),
            other => Err(Error::Config(format!(
                "unknown dedupe load policy '{other}' (expected 'abort' or 'empty')"
            ))),
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The queried window.
    pub window: TimeWindow,

    /// Identifiers in the dedupe store when the run started.
    pub known: usize,

    /// Raw documents read from the source.
    pub fetched: usize,

    /// Documents dropped because the alert is not open.
    pub filtered: usize,

    /// Open alerts that could not be normalized.
    pub invalid: usize,

    /// Alerts already notified by an earlier run or earlier in this run.
    pub duplicates: usize,

    /// Identifiers whose notification was delivered, in delivery order.
    pub sent: Vec<String>,

    /// Identifiers whose notification failed; retried next run.
    pub failed: Vec<String>,
}

impl RunReport {
    /// An empty report for `window`.
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            known: 0,
            fetched: 0,
            filtered: 0,
            invalid: 0,
            duplicates: 0,
            sent: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// True when every new alert was delivered.
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A run-level failure.
#[derive(Debug, Error)]
pub enum RunFailure {
    /// The run stopped before delivering anything.
    #[error("run aborted: {0}")]
    Aborted(#[source] Error),

    /// Notifications went out but their identifiers were not persisted; they
    /// may be sent again by the next run.
    #[error("{} notification(s) sent but not recorded: {error}", .report.sent.len())]
    Commit {
        #[source]
        error: Error,
        report: Box<RunReport>,
    },
}

/// Drives a single poll-notify-commit run.
pub struct Pipeline<'a> {
    source: &'a dyn AlertSource,
    notifier: &'a dyn Notifier,
    store: &'a dyn DedupeStore,
    lookback: Duration,
    load_policy: DedupeLoadPolicy,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline with a two-day lookback and the abort load policy.
    pub fn new(
        source: &'a dyn AlertSource,
        notifier: &'a dyn Notifier,
        store: &'a dyn DedupeStore,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            lookback: Duration::from_secs(2 * 24 * 60 * 60),
            load_policy: DedupeLoadPolicy::Abort,
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_load_policy(mut self, policy: DedupeLoadPolicy) -> Self {
        self.load_policy = policy;
        self
    }

    /// Run once for the window ending at `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> std::result::Result<RunReport, RunFailure> {
        metrics::counter!(m::RUNS).increment(1);

        let result = self.run_inner(now).await;
        match &result {
            Ok(report) => {
                record(report);
                metrics::gauge!(m::LAST_RUN_TIMESTAMP).set(now.timestamp() as f64);
            }
            Err(failure) => {
                if let RunFailure::Commit { report, .. } = failure {
                    record(report);
                }
                metrics::counter!(m::RUN_FAILURES).increment(1);
            }
        }
        result
    }

    async fn run_inner(&self, now: DateTime<Utc>) -> std::result::Result<RunReport, RunFailure> {
        let window = TimeWindow::ending_at(now, self.lookback);
        let mut report = RunReport::new(window);

        let known = self.load_known()?;
        report.known = known.len();
        metrics::gauge!(m::KNOWN_IDS).set(known.len() as f64);

        let pending = self
            .collect_new(window, &known, &mut report)
            .await
            .map_err(RunFailure::Aborted)?;

        tracing::info!(
            source = self.source.name(),
            fetched = report.fetched,
            filtered = report.filtered,
            invalid = report.invalid,
            duplicates = report.duplicates,
            new = pending.len(),
            "window scanned"
        );

        let mut newly_sent = HashSet::with_capacity(pending.len());
        for alert in pending {
            match self.deliver(&alert).await {
                Ok(()) => {
                    tracing::info!(id = %alert.identifier, host = %alert.host, "alert notified");
                    newly_sent.insert(alert.identifier.clone());
                    report.sent.push(alert.identifier);
                }
                Err(e) => {
                    tracing::error!(
                        id = %alert.identifier,
                        notifier = self.notifier.name(),
                        error = %e,
                        "notification failed, will retry next run"
                    );
                    report.failed.push(alert.identifier);
                }
            }
        }

        if let Err(error) = self.store.commit(&newly_sent) {
            tracing::error!(
                store = self.store.name(),
                error = %error,
                unrecorded = newly_sent.len(),
                "failed to record notified alerts"
            );
            return Err(RunFailure::Commit {
                error,
                report: Box::new(report),
            });
        }

        Ok(report)
    }

    fn load_known(&self) -> std::result::Result<HashSet<String>, RunFailure> {
        match self.store.load() {
            Ok(known) => Ok(known),
            Err(e) => match self.load_policy {
                DedupeLoadPolicy::Abort => Err(RunFailure::Aborted(e)),
                DedupeLoadPolicy::TreatAsEmpty => {
                    tracing::warn!(
                        store = self.store.name(),
                        error = %e,
                        "dedupe state unreadable, treating as empty; alerts may be re-sent"
                    );
                    Ok(HashSet::new())
                }
            },
        }
    }

    /// Drain the source, returning new alerts in discovery order.
    async fn collect_new(
        &self,
        window: TimeWindow,
        known: &HashSet<String>,
        report: &mut RunReport,
    ) -> Result<Vec<Alert>> {
        let mut stream = self.source.fetch(window).await?;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        while let Some(doc) = stream.try_next().await? {
            report.fetched += 1;

            let alert = match normalize(&doc) {
                Ok(Some(alert)) => alert,
                Ok(None) => {
                    report.filtered += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed alert");
                    report.invalid += 1;
                    continue;
                }
            };

            if known.contains(&alert.identifier) || !seen.insert(alert.identifier.clone()) {
                report.duplicates += 1;
                continue;
            }

            pending.push(alert);
        }

        Ok(pending)
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let message = alert.to_message()?;
        self.notifier.send(&message).await
    }
}

fn record(report: &RunReport) {
    metrics::counter!(m::ALERTS_FETCHED).increment(report.fetched as u64);
    metrics::counter!(m::ALERTS_FILTERED).increment(report.filtered as u64);
    metrics::counter!(m::ALERTS_INVALID).increment(report.invalid as u64);
    metrics::counter!(m::ALERTS_DUPLICATE).increment(report.duplicates as u64);
    metrics::counter!(m::ALERTS_SENT).increment(report.sent.len() as u64);
    metrics::counter!(m::ALERTS_FAILED).increment(report.failed.len() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::AlertStream;
    use alertwatch_core::RawAlert;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures::{StreamExt, stream};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    // =========================================================================
    // Fakes
    // =========================================================================

    /// Replays the same documents on every fetch, optionally failing after
    /// `fail_after` documents.
    #[derive(Default)]
    struct FakeSource {
        docs: Vec<Value>,
        fail_after: Option<usize>,
        fail_on_open: bool,
        windows: Mutex<Vec<TimeWindow>>,
    }

    #[async_trait]
    impl AlertSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch(&self, window: TimeWindow) -> Result<AlertStream> {
            self.windows.lock().unwrap().push(window);
            if self.fail_on_open {
                return Err(Error::SourceConnection("connection refused".to_string()));
            }

            let mut items: Vec<Result<RawAlert>> = self
                .docs
                .iter()
                .enumerate()
                .map(|(i, doc)| Ok(RawAlert::new(format!("doc-{i}"), doc.clone())))
                .collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(Error::SourceQuery("scroll expired".to_string())));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    /// Records every message; fails for alerts whose id is in `failing`.
    #[derive(Default)]
    struct FakeNotifier {
        failing: Mutex<HashSet<String>>,
        sent: Mutex<Vec<String>>,
        attempts: Mutex<usize>,
    }

    impl FakeNotifier {
        fn fail_for(&self, id: &str) {
            self.failing.lock().unwrap().insert(id.to_string());
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn send(&self, message: &str) -> Result<()> {
            *self.attempts.lock().unwrap() += 1;
            let failing = self.failing.lock().unwrap();
            if failing
                .iter()
                .any(|id| message.contains(&format!("\"id\": \"{id}\"")))
            {
                return Err(Error::NotifierSend("429 Too Many Requests".to_string()));
            }
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        ids: Mutex<HashSet<String>>,
        commits: Mutex<Vec<HashSet<String>>>,
        fail_load: bool,
        fail_commit: bool,
    }

    impl MemoryStore {
        fn with_ids(list: &[&str]) -> Self {
            Self {
                ids: Mutex::new(list.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        fn ids(&self) -> HashSet<String> {
            self.ids.lock().unwrap().clone()
        }
    }

    impl DedupeStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn load(&self) -> Result<HashSet<String>> {
            if self.fail_load {
                return Err(Error::DedupeLoad("permission denied".to_string()));
            }
            Ok(self.ids())
        }

        fn commit(&self, ids: &HashSet<String>) -> Result<()> {
            if self.fail_commit {
                return Err(Error::DedupeCommit("disk full".to_string()));
            }
            self.commits.lock().unwrap().push(ids.clone());
            self.ids.lock().unwrap().extend(ids.iter().cloned());
            Ok(())
        }
    }

    fn doc(id: &str, status: &str) -> Value {
        json!({
            "kibana.alert.workflow_status": status,
            "kibana.alert.start": "2024-05-01T10:00:00.000Z",
            "kibana.alert.rule.parameters": { "description": "Encoded PowerShell", "severity": "high" },
            "host": { "hostname": "ws-042" },
            "kibana.alert.reason": "process event on ws-042",
            "kibana.alert.uuid": id
        })
    }

    fn source(docs: Vec<Value>) -> FakeSource {
        FakeSource {
            docs,
            ..Default::default()
        }
    }

    fn set(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap()
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[tokio::test]
    async fn test_open_alert_sent_and_committed() {
        let src = source(vec![doc("a1", "open"), doc("a2", "acknowledged")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let report = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap();

        assert_eq!(notifier.attempts(), 1);
        assert!(notifier.sent()[0].contains("\"id\": \"a1\""));
        assert_eq!(store.ids(), set(&["a1"]));
        assert_eq!(report.fetched, 2);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.sent, vec!["a1".to_string()]);
        assert!(report.all_delivered());
    }

    #[tokio::test]
    async fn test_known_alert_not_resent() {
        let src = source(vec![doc("a1", "open"), doc("a2", "acknowledged")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::with_ids(&["a1"]);

        let report = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap();

        assert_eq!(notifier.attempts(), 0);
        assert_eq!(store.ids(), set(&["a1"]));
        assert_eq!(report.known, 1);
        assert_eq!(report.duplicates, 1);
        // Empty commit is still issued and is a no-op
        assert_eq!(store.commits.lock().unwrap().as_slice(), &[HashSet::new()]);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_stream_sent_once() {
        let src = source(vec![doc("dup", "open"), doc("dup", "open")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let report = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap();

        assert_eq!(notifier.attempts(), 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.ids(), set(&["dup"]));
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[tokio::test]
    async fn test_idempotent_across_runs() {
        let src = source(vec![doc("a1", "open"), doc("a2", "open"), doc("a3", "closed")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();
        let pipeline = Pipeline::new(&src, &notifier, &store);

        pipeline.run_once(now()).await.unwrap();
        assert_eq!(notifier.attempts(), 2);

        let second = pipeline.run_once(now()).await.unwrap();
        assert_eq!(notifier.attempts(), 2);
        assert!(second.sent.is_empty());
        assert_eq!(second.duplicates, 2);
    }

    #[tokio::test]
    async fn test_non_open_never_sent() {
        let src = source(vec![
            doc("a1", "acknowledged"),
            doc("a2", "closed"),
            doc("a3", "in-progress"),
        ]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let report = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap();

        assert_eq!(notifier.attempts(), 0);
        assert_eq!(report.filtered, 3);
        assert!(store.ids().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_retried_next_run() {
        let src = source(vec![doc("a1", "open"), doc("a2", "open")]);
        let notifier = FakeNotifier::default();
        notifier.fail_for("a1");
        let store = MemoryStore::default();
        let pipeline = Pipeline::new(&src, &notifier, &store);

        let first = pipeline.run_once(now()).await.unwrap();
        assert_eq!(first.failed, vec!["a1".to_string()]);
        assert_eq!(first.sent, vec!["a2".to_string()]);
        assert!(!first.all_delivered());
        assert_eq!(store.ids(), set(&["a2"]));

        notifier.heal();
        let second = pipeline.run_once(now()).await.unwrap();
        assert_eq!(second.sent, vec!["a1".to_string()]);
        assert_eq!(store.ids(), set(&["a1", "a2"]));
    }

    #[tokio::test]
    async fn test_commit_equals_successful_sends() {
        let src = source(vec![
            doc("a1", "open"),
            doc("a2", "open"),
            doc("a3", "open"),
            doc("a4", "closed"),
        ]);
        let notifier = FakeNotifier::default();
        notifier.fail_for("a2");
        let store = MemoryStore::with_ids(&["a3"]);

        Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap();

        let commits = store.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0], set(&["a1"]));
    }

    #[tokio::test]
    async fn test_delivery_follows_source_order() {
        let src = source(vec![doc("c", "open"), doc("a", "open"), doc("b", "open")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let report = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap();

        assert_eq!(report.sent, vec!["c", "a", "b"]);
        let sent = notifier.sent();
        assert!(sent[0].contains("\"id\": \"c\""));
        assert!(sent[2].contains("\"id\": \"b\""));
    }

    // =========================================================================
    // Failure handling
    // =========================================================================

    #[tokio::test]
    async fn test_malformed_alert_skipped() {
        let mut broken = doc("bad", "open");
        broken.as_object_mut().unwrap().remove("kibana.alert.reason");
        let src = source(vec![broken, doc("a1", "open")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let report = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap();

        assert_eq!(report.invalid, 1);
        assert_eq!(store.ids(), set(&["a1"]));
    }

    #[tokio::test]
    async fn test_mid_stream_error_sends_nothing() {
        let src = FakeSource {
            docs: vec![doc("a1", "open"), doc("a2", "open"), doc("a3", "open")],
            fail_after: Some(2),
            ..Default::default()
        };
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let failure = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap_err();

        assert!(matches!(failure, RunFailure::Aborted(Error::SourceQuery(_))));
        assert_eq!(notifier.attempts(), 0);
        assert!(store.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_unreachable_aborts() {
        let src = FakeSource {
            fail_on_open: true,
            ..Default::default()
        };
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let failure = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap_err();

        assert!(matches!(failure, RunFailure::Aborted(Error::SourceConnection(_))));
        assert!(store.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_aborts_by_default() {
        let src = source(vec![doc("a1", "open")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore {
            fail_load: true,
            ..Default::default()
        };

        let failure = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap_err();

        assert!(matches!(failure, RunFailure::Aborted(Error::DedupeLoad(_))));
        assert_eq!(notifier.attempts(), 0);
        // The source is never queried
        assert!(src.windows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_treated_as_empty() {
        let src = source(vec![doc("a1", "open")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore {
            ids: Mutex::new(set(&["a1"])),
            fail_load: true,
            ..Default::default()
        };

        let report = Pipeline::new(&src, &notifier, &store)
            .with_load_policy(DedupeLoadPolicy::TreatAsEmpty)
            .run_once(now())
            .await
            .unwrap();

        assert_eq!(report.known, 0);
        assert_eq!(notifier.attempts(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_reported_after_delivery() {
        let src = source(vec![doc("a1", "open")]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore {
            fail_commit: true,
            ..Default::default()
        };

        let failure = Pipeline::new(&src, &notifier, &store)
            .run_once(now())
            .await
            .unwrap_err();

        assert_eq!(notifier.attempts(), 1);
        match failure {
            RunFailure::Commit { error, report } => {
                assert!(matches!(error, Error::DedupeCommit(_)));
                assert_eq!(report.sent, vec!["a1".to_string()]);
            }
            other => panic!("expected commit failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_file_store_ids_survive_across_runs() {
        use crate::dedupe::FileDedupeStore;
        use tempfile::TempDir;

        let tmp = TempDir::new().unwrap();
        let store = FileDedupeStore::new(tmp.path().join("processed_ids.txt"));
        let src = source(vec![
            doc("good-1", "open"),
            doc(" padded ", "open"),
            doc("bad\nid", "open"),
        ]);
        let notifier = FakeNotifier::default();
        let pipeline = Pipeline::new(&src, &notifier, &store);

        for _ in 0..3 {
            let report = pipeline.run_once(now()).await.unwrap();
            assert_eq!(report.invalid, 2);
        }

        // Unstorable ids are skipped before sending, so the valid one is
        // recorded and delivered exactly once.
        assert_eq!(notifier.attempts(), 1);
        assert_eq!(store.load().unwrap(), set(&["good-1"]));
    }

    #[tokio::test]
    async fn test_window_uses_lookback() {
        let src = source(vec![]);
        let notifier = FakeNotifier::default();
        let store = MemoryStore::default();

        let report = Pipeline::new(&src, &notifier, &store)
            .with_lookback(Duration::from_secs(3600))
            .run_once(now())
            .await
            .unwrap();

        let expected = TimeWindow::ending_at(now(), Duration::from_secs(3600));
        assert_eq!(report.window, expected);
        assert_eq!(src.windows.lock().unwrap().as_slice(), &[expected]);
    }

    #[test]
    fn test_load_policy_parsing() {
        assert_eq!("abort".parse::<DedupeLoadPolicy>().unwrap(), DedupeLoadPolicy::Abort);
        assert_eq!(
            "Empty".parse::<DedupeLoadPolicy>().unwrap(),
            DedupeLoadPolicy::TreatAsEmpty
        );
        assert!("ignore".parse::<DedupeLoadPolicy>().is_err());
    }
}
