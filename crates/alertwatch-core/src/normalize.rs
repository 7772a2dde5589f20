//! Raw document to [`Alert`] mapping.
//!
//! Only documents in the `open` workflow status become alerts. Acknowledged
//! or closed alerts are filtered out without error; an open alert lacking one
//! of the mapped fields is a per-document data error.

use crate::alert::{Alert, RawAlert, Severity};
use crate::error::{Error, Result};

/// Workflow status field on detection-engine alerts.
pub const WORKFLOW_STATUS_FIELD: &str = "kibana.alert.workflow_status";

/// The only workflow status that produces a notification.
pub const OPEN_STATUS: &str = "open";

const START_FIELD: &str = "kibana.alert.start";
const DESCRIPTION_FIELD: &str = "kibana.alert.rule.parameters.description";
const SEVERITY_FIELD: &str = "kibana.alert.rule.parameters.severity";
const HOSTNAME_FIELD: &str = "host.hostname";
const REASON_FIELD: &str = "kibana.alert.reason";
const UUID_FIELD: &str = "kibana.alert.uuid";

/// Normalize a raw alert document.
///
/// Returns `Ok(None)` when the alert is not open, `Ok(Some(_))` for a
/// complete open alert, and `Err` when the document cannot be mapped.
pub fn normalize(doc: &RawAlert) -> Result<Option<Alert>> {
    let status = required_str(doc, WORKFLOW_STATUS_FIELD)?;
    if status != OPEN_STATUS {
        return Ok(None);
    }

    let identifier = required_str(doc, UUID_FIELD)?;
    if let Some(reason) = identifier_problem(identifier) {
        return Err(Error::InvalidField {
            doc_id: doc.doc_id.clone(),
            field: UUID_FIELD,
            reason: reason.to_string(),
        });
    }

    Ok(Some(Alert {
        timestamp: required_str(doc, START_FIELD)?.to_string(),
        description: required_str(doc, DESCRIPTION_FIELD)?.to_string(),
        severity: Severity::from(required_str(doc, SEVERITY_FIELD)?.to_string()),
        host: required_str(doc, HOSTNAME_FIELD)?.to_string(),
        reason: required_str(doc, REASON_FIELD)?.to_string(),
        identifier: identifier.to_string(),
    }))
}

/// Identifiers are stored one per line, so they must survive a trim and a
/// line split unchanged.
fn identifier_problem(identifier: &str) -> Option<&'static str> {
    if identifier.trim().is_empty() {
        Some("empty identifier")
    } else if identifier.contains(['\n', '\r']) {
        Some("identifier contains a line break")
    } else if identifier.trim() != identifier {
        Some("identifier has surrounding whitespace")
    } else {
        None
    }
}

fn required_str<'a>(doc: &'a RawAlert, field: &'static str) -> Result<&'a str> {
    match doc.field(field) {
        None | Some(serde_json::Value::Null) => Err(Error::MissingField {
            doc_id: doc.doc_id.clone(),
            field,
        }),
        Some(value) => value.as_str().ok_or_else(|| Error::InvalidField {
            doc_id: doc.doc_id.clone(),
            field,
            reason: format!("expected a string, got {value}"),
        }),
    }
}
