//! Application configuration loaded from environment variables.
//!
//! Built once at startup and handed to the adapters and the pipeline; nothing
//! reads the environment after [`Config::from_env`] returns.

use crate::dedupe::DedupeBackend;
use crate::notifier::TelegramConfig;
use crate::pipeline::DedupeLoadPolicy;
use crate::source::ElasticConfig;
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Alert store connection and query settings.
    pub elastic: ElasticConfig,

    /// Notification destination.
    pub telegram: TelegramConfig,

    /// How far back each run queries.
    pub lookback: Duration,

    /// Dedupe store implementation.
    pub dedupe_backend: DedupeBackend,

    /// Dedupe store location (file for `file`, directory for `rocksdb`).
    pub dedupe_path: PathBuf,

    /// What to do when the dedupe store cannot be read.
    pub dedupe_load_policy: DedupeLoadPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required (uppercase name preferred, legacy lowercase name accepted):
    /// - `ELASTIC_HOST`: Elasticsearch base URL
    /// - `ELASTIC_API_KEY` / `api_key`: Elasticsearch API key
    /// - `TELEGRAM_TOKEN` / `token`: bot token
    /// - `TELEGRAM_CHAT_ID` / `chat_id`: destination chat
    ///
    /// Optional:
    /// - `TELEGRAM_THREAD_ID` / `message_thread_id`: forum topic id
    /// - `TELEGRAM_API_BASE`: Bot API base URL (default: "https://api.telegram.org")
    /// - `ALERTWATCH_LOOKBACK`: query window (default: "2d")
    /// - `ALERTWATCH_INDEX_PATTERN`: index pattern (default: ".siem-signals-*")
    /// - `ALERTWATCH_TIMESTAMP_FIELD`: range field (default: "@timestamp")
    /// - `ALERTWATCH_PAGE_SIZE`: scroll page size (default: 500)
    /// - `ALERTWATCH_SCROLL_KEEPALIVE`: scroll context lifetime (default: "5m")
    /// - `ALERTWATCH_HTTP_TIMEOUT`: per-request timeout (default: "30s")
    /// - `ALERTWATCH_DEDUP_BACKEND`: "file" or "rocksdb" (default: "file")
    /// - `ALERTWATCH_DEDUP_PATH`: dedupe location (default: "processed_ids.txt")
    /// - `ALERTWATCH_ON_DEDUP_LOAD_FAILURE`: "abort" or "empty" (default: "abort")
    /// - `ELASTIC_INSECURE_TLS`: skip certificate verification (default: false)
    pub fn from_env() -> Result<Self> {
        let request_timeout = duration_var("ALERTWATCH_HTTP_TIMEOUT", "30s")?;

        let page_size = match var(&["ALERTWATCH_PAGE_SIZE"]) {
            Some(v) => v
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("ALERTWATCH_PAGE_SIZE", &v, "a positive integer"))?,
            None => 500,
        };

        let elastic = ElasticConfig {
            url: required(&["ELASTIC_HOST"])?,
            api_key: required(&["ELASTIC_API_KEY", "api_key"])?,
            index_pattern: var(&["ALERTWATCH_INDEX_PATTERN"])
                .unwrap_or_else(|| ".siem-signals-*".to_string()),
            timestamp_field: var(&["ALERTWATCH_TIMESTAMP_FIELD"])
                .unwrap_or_else(|| "@timestamp".to_string()),
            page_size,
            scroll_keepalive: duration_var("ALERTWATCH_SCROLL_KEEPALIVE", "5m")?,
            insecure_tls: bool_var("ELASTIC_INSECURE_TLS")?,
            request_timeout,
        };

        let message_thread_id = match var(&["TELEGRAM_THREAD_ID", "message_thread_id"]) {
            Some(v) => Some(
                v.parse::<i64>()
                    .map_err(|_| invalid("TELEGRAM_THREAD_ID", &v, "an integer"))?,
            ),
            None => None,
        };

        let telegram = TelegramConfig {
            api_base: var(&["TELEGRAM_API_BASE"])
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            token: required(&["TELEGRAM_TOKEN", "token"])?,
            chat_id: required(&["TELEGRAM_CHAT_ID", "chat_id"])?,
            message_thread_id,
            request_timeout,
        };

        let dedupe_backend = match var(&["ALERTWATCH_DEDUP_BACKEND"]) {
            Some(v) => v.parse()?,
            None => DedupeBackend::File,
        };

        let dedupe_load_policy = match var(&["ALERTWATCH_ON_DEDUP_LOAD_FAILURE"]) {
            Some(v) => v.parse()?,
            None => DedupeLoadPolicy::Abort,
        };

        let config = Self {
            elastic,
            telegram,
            lookback: duration_var("ALERTWATCH_LOOKBACK", "2d")?,
            dedupe_backend,
            dedupe_path: var(&["ALERTWATCH_DEDUP_PATH"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("processed_ids.txt")),
            dedupe_load_policy,
        };

        tracing::info!(
            elastic_url = %config.elastic.url,
            index_pattern = %config.elastic.index_pattern,
            lookback = %humantime::format_duration(config.lookback),
            dedupe_backend = ?config.dedupe_backend,
            dedupe_path = %config.dedupe_path.display(),
            chat_id = %config.telegram.chat_id,
            "configuration loaded"
        );

        Ok(config)
    }
}

/// First non-empty value among `names`.
fn var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn required(names: &[&str]) -> Result<String> {
    var(names).ok_or_else(|| {
        Error::Config(format!(
            "environment variable {} is not set",
            names.join(" / ")
        ))
    })
}

fn duration_var(name: &str, default: &str) -> Result<Duration> {
    let raw = var(&[name]).unwrap_or_else(|| default.to_string());
    humantime::parse_duration(&raw).map_err(|_| invalid(name, &raw, "a duration like \"2d\""))
}

fn bool_var(name: &str) -> Result<bool> {
    match var(&[name]).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(name, &v, "a boolean")),
        },
    }
}

fn invalid(name: &str, value: &str, expected: &str) -> Error {
    Error::Config(format!("{name}={value:?} is not {expected}"))
}
