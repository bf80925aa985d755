//! Parse queue message JSON bodies into [`EvidenceEvent`]s.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use attest_core::{compute_dedup_key, flatten_json, EvidenceEvent};

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Well-known field names for the resource identifier (tried in order).
const RESOURCE_ID_KEYS: &[&str] = &["resource_id", "resourceId", "arn", "id"];

const SOURCE_ID_KEYS: &[&str] = &["source_id", "sourceId", "source"];

const RESOURCE_TYPE_KEYS: &[&str] = &["resource_type", "resourceType", "type"];

const OBSERVED_AT_KEYS: &[&str] = &["observed_at", "observedAt", "timestamp"];

const SEQUENCE_KEYS: &[&str] = &["sequence_hint", "sequenceHint", "sequence"];

const DEDUP_KEYS: &[&str] = &["dedup_key", "dedupKey"];

const ATTRIBUTES_KEY: &str = "attributes";

/// Source id used when a producer does not name itself.
pub const DEFAULT_SOURCE_ID: &str = "queue";

fn probe<'a>(obj: &'a Map<String, Value>, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    keys.iter().find_map(|k| obj.get(*k).map(|v| (*k, v)))
}

fn probe_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
}

/// Parse a single queue message body into an [`EvidenceEvent`].
///
/// Envelope fields are probed under several spellings:
/// - **resource id** (required): `resource_id`, `resourceId`, `arn`, `id`
/// - **source id**: defaults to `"queue"`
/// - **observed_at**: falls back to the queue message timestamp
/// - **sequence hint**: optional non-negative integer
/// - **dedup key**: computed from the payload when absent
///
/// Attributes come from a nested `attributes` object when present; otherwise
/// every non-envelope field is treated as an attribute. Nested objects are
/// flattened into dotted paths.
pub fn parse_message(msg: &QueueMessage) -> Result<EvidenceEvent, QueueError> {
    let json: Value = serde_json::from_str(&msg.body)
        .map_err(|e| QueueError::Parse(format!("Invalid JSON in message {}: {}", msg.id, e)))?;

    let obj = json
        .as_object()
        .ok_or_else(|| QueueError::Parse(format!("Message {} body is not a JSON object", msg.id)))?;

    let resource_id = probe_str(obj, RESOURCE_ID_KEYS)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueueError::Parse(format!("Message {} has no resource id", msg.id)))?
        .to_string();

    let source_id = probe_str(obj, SOURCE_ID_KEYS)
        .unwrap_or(DEFAULT_SOURCE_ID)
        .to_string();

    let resource_type = probe_str(obj, RESOURCE_TYPE_KEYS).unwrap_or_default().to_string();

    let observed_at = probe_str(obj, OBSERVED_AT_KEYS)
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or(msg.timestamp);

    let sequence_hint = match probe(obj, SEQUENCE_KEYS) {
        None | Some((_, Value::Null)) => None,
        Some((key, value)) => Some(value.as_u64().ok_or_else(|| {
            QueueError::Parse(format!(
                "Message {} field {key} is not a non-negative integer",
                msg.id
            ))
        })?),
    };

    let attributes = match obj.get(ATTRIBUTES_KEY) {
        Some(nested @ Value::Object(_)) => flatten_json(nested),
        Some(Value::Null) | None => flatten_json(&Value::Object(payload_fields(obj))),
        Some(_) => {
            return Err(QueueError::Parse(format!(
                "Message {} attributes is not a JSON object",
                msg.id
            )))
        }
    };

    let dedup_key = probe_str(obj, DEDUP_KEYS)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| compute_dedup_key(&resource_id, &source_id, &attributes));

    Ok(EvidenceEvent {
        resource_id,
        source_id,
        resource_type,
        attributes,
        observed_at,
        dedup_key,
        sequence_hint,
    })
}

/// All fields except the envelope keys.
fn payload_fields(obj: &Map<String, Value>) -> Map<String, Value> {
    let envelope = [
        RESOURCE_ID_KEYS,
        SOURCE_ID_KEYS,
        RESOURCE_TYPE_KEYS,
        OBSERVED_AT_KEYS,
        SEQUENCE_KEYS,
        DEDUP_KEYS,
    ];
    obj.iter()
        .filter(|(k, _)| !envelope.iter().any(|keys| keys.contains(&k.as_str())))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Parse a batch of messages, separating successes from failures.
///
/// Returns `(events, errors)` where errors carry the message id. Good messages
/// are never blocked by bad ones.
pub fn parse_batch(messages: &[QueueMessage]) -> (Vec<EvidenceEvent>, Vec<(String, QueueError)>) {
    let mut events = Vec::with_capacity(messages.len());
    let mut errors = Vec::new();

    for msg in messages {
        match parse_message(msg) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "Failed to parse queue message");
                errors.push((msg.id.clone(), e));
            }
        }
    }

    (events, errors)
}
