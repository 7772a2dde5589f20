//! Canonical alert record and raw search documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Rule severity as reported by the detection engine.
///
/// Kibana emits the four lowercase levels below. Any other value, including
/// a differently-cased level, is kept verbatim so notifications show the
/// source text unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Other(String),
}

impl Severity {
    /// Wire representation of the severity.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Other(s) => s,
        }
    }

    /// Emoji prefixed to notifications of this severity.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Critical => "🔴",
            Self::High => "🟠",
            Self::Medium => "🟡",
            Self::Low => "🔵",
            Self::Other(_) => "⚪",
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        match s.as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Other(s),
        }
    }
}

impl From<Severity> for String {
    fn from(s: Severity) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized detection alert.
///
/// Field order matters: it is the order of the JSON block embedded in
/// notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert start time, ISO-8601 as emitted by the source.
    #[serde(rename = "time")]
    pub timestamp: String,

    /// Rule description.
    pub description: String,

    /// Rule severity.
    pub severity: Severity,

    /// Originating host name.
    pub host: String,

    /// Human-readable reason the rule fired.
    pub reason: String,

    /// Stable alert UUID; the deduplication key.
    #[serde(rename = "id")]
    pub identifier: String,
}

impl Alert {
    /// Render the alert as a Markdown notification body.
    ///
    /// ~~~text
    /// 🔴 Elastic Detection:
    /// ```
    /// {
    ///   "time": "...",
    ///   ...
    /// }
    /// ```
    /// ~~~
    pub fn to_message(&self) -> crate::Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        // A literal fence inside a value would close the code block early.
        let json = json.replace("```", "'''");
        Ok(format!(
            "{} Elastic Detection:\n```\n{}\n```",
            self.severity.marker(),
            json
        ))
    }
}

/// One hit from the alert index: its `_id` and untouched `_source`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawAlert {
    /// Document `_id` in the alert index (used only for diagnostics).
    #[serde(rename = "_id", default)]
    pub doc_id: String,

    /// The document body.
    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl RawAlert {
    pub fn new(doc_id: impl Into<String>, source: Value) -> Self {
        Self {
            doc_id: doc_id.into(),
            source,
        }
    }

    /// Look up a dotted field path.
    ///
    /// Elasticsearch documents may store `kibana.alert.uuid` as a flat key, as
    /// nested objects, or as any mix of the two (`"kibana.alert": {"uuid": ..}`),
    /// so every split of the path is tried.
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup(&self.source, path)
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;
    if let Some(v) = obj.get(path) {
        return Some(v);
    }
    // Longest prefix first, so flat keys beat partial nesting.
    for (idx, _) in path.rmatch_indices('.') {
        let (head, tail) = (&path[..idx], &path[idx + 1..]);
        if let Some(found) = obj.get(head).and_then(|child| lookup(child, tail)) {
            return Some(found);
        }
    }
    None
}
