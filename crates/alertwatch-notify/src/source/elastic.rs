//! Elasticsearch alert source.
//!
//! Runs a range query against the detection-engine signal indices and walks
//! the result set with the scroll API, one page at a time.
//!
//! # Request Flow
//!
//! ```text
//! POST /{index}/_search?scroll=5m      -> page 1 + scroll_id
//! POST /_search/scroll {scroll_id}     -> page 2 + scroll_id
//! ...                                  -> empty page
//! DELETE /_search/scroll {scroll_id}   (best effort)
//! ```

use super::{AlertSource, AlertStream};
use crate::{Error, Result};
use alertwatch_core::{RawAlert, TimeWindow};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Configuration for the Elasticsearch source.
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Base URL of the cluster (e.g., "https://elastic.internal:9200").
    pub url: String,

    /// Encoded API key sent as `Authorization: ApiKey <key>`.
    pub api_key: String,

    /// Index pattern to search.
    pub index_pattern: String,

    /// Field the time range applies to.
    pub timestamp_field: String,

    /// Documents per scroll page.
    pub page_size: usize,

    /// How long the cluster keeps the scroll context between pages.
    pub scroll_keepalive: Duration,

    /// Skip TLS certificate verification (self-signed clusters).
    pub insecure_tls: bool,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            api_key: String::new(),
            index_pattern: ".siem-signals-*".to_string(),
            timestamp_field: "@timestamp".to_string(),
            page_size: 500,
            scroll_keepalive: Duration::from_secs(300),
            insecure_tls: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Elasticsearch scroll-search source.
pub struct ElasticSource {
    config: ElasticConfig,
    scroll: ScrollClient,
}

impl ElasticSource {
    /// Create a new source with the given configuration.
    pub fn new(config: ElasticConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| Error::Config(format!("building Elasticsearch client: {e}")))?;

        if config.insecure_tls {
            tracing::warn!("TLS certificate verification disabled for {}", config.url);
        }

        let scroll = ScrollClient {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            auth: format!("ApiKey {}", config.api_key),
            keepalive: format!("{}s", config.scroll_keepalive.as_secs().max(1)),
        };

        Ok(Self { config, scroll })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ElasticConfig {
        &self.config
    }

    fn query(&self, window: &TimeWindow) -> Value {
        let mut range = serde_json::Map::new();
        range.insert(
            self.config.timestamp_field.clone(),
            json!({
                "gte": window.start_rfc3339(),
                "lte": window.end_rfc3339(),
            }),
        );

        // `_doc` order is the cheapest for scrolling; delivery follows it.
        json!({
            "size": self.config.page_size,
            "sort": ["_doc"],
            "query": { "range": range }
        })
    }
}

#[async_trait]
impl AlertSource for ElasticSource {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn fetch(&self, window: TimeWindow) -> Result<AlertStream> {
        tracing::debug!(
            index = %self.config.index_pattern,
            gte = %window.start_rfc3339(),
            lte = %window.end_rfc3339(),
            "starting scroll search"
        );

        let first = self
            .scroll
            .open(&self.config.index_pattern, &self.query(&window))
            .await?;

        let scroll = self.scroll.clone();
        let pages = stream::try_unfold(Cursor::Ready(first), move |cursor| {
            let scroll = scroll.clone();
            async move {
                let page = match cursor {
                    Cursor::Done => return Ok::<_, Error>(None),
                    Cursor::Ready(page) => page,
                    Cursor::Scroll(id) => scroll.next(&id).await?,
                };

                if page.hits.hits.is_empty() {
                    if let Some(id) = page.scroll_id {
                        scroll.clear(&id).await;
                    }
                    return Ok(None);
                }

                let next = match page.scroll_id {
                    Some(id) => Cursor::Scroll(id),
                    None => Cursor::Done,
                };
                Ok(Some((page.hits.hits, next)))
            }
        });

        Ok(pages
            .map_ok(|hits| stream::iter(hits.into_iter().map(Ok::<RawAlert, Error>)))
            .try_flatten()
            .boxed())
    }
}

enum Cursor {
    Ready(SearchPage),
    Scroll(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<RawAlert>,
}

/// The owned pieces of the source a stream needs after `fetch` returns.
#[derive(Clone)]
struct ScrollClient {
    client: reqwest::Client,
    base_url: String,
    auth: String,
    keepalive: String,
}

impl ScrollClient {
    async fn open(&self, index: &str, query: &Value) -> Result<SearchPage> {
        let request = self
            .client
            .post(format!("{}/{}/_search", self.base_url, index))
            .query(&[("scroll", self.keepalive.as_str())])
            .json(query);
        self.page(request).await
    }

    async fn next(&self, scroll_id: &str) -> Result<SearchPage> {
        let request = self
            .client
            .post(format!("{}/_search/scroll", self.base_url))
            .json(&json!({ "scroll": self.keepalive, "scroll_id": scroll_id }));
        self.page(request).await
    }

    /// Release the scroll context. Failures only cost cluster memory until
    /// the keepalive expires, so they are logged and ignored.
    async fn clear(&self, scroll_id: &str) {
        let result = self
            .client
            .delete(format!("{}/_search/scroll", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.auth)
            .json(&json!({ "scroll_id": [scroll_id] }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => tracing::warn!(status = %resp.status(), "failed to clear scroll"),
            Err(e) => tracing::warn!(error = %e, "failed to clear scroll"),
        }
    }

    async fn page(&self, request: reqwest::RequestBuilder) -> Result<SearchPage> {
        let resp = request
            .header(reqwest::header::AUTHORIZATION, &self.auth)
            .send()
            .await
            .map_err(|e| Error::SourceConnection(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::SourceConnection(format!(
                "authentication rejected ({status}): {body}"
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::SourceQuery(format!("{status}: {body}")));
        }

        resp.json::<SearchPage>()
            .await
            .map_err(|e| Error::SourceQuery(format!("unexpected search response: {e}")))
    }
}
