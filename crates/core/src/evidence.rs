//! Evidence data model: typed attribute values, versioned records, and the
//! change events that carry them into the pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier of an observed resource (bucket ARN, account id, control id...).
pub type ResourceId = String;

/// Identifier of the adapter or producer that observed the evidence.
pub type SourceId = String;

/// Attribute map keyed by dotted field path (`encryption.enabled`).
///
/// A `BTreeMap` so that iteration order, hashing, and serialization are stable.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Typed attribute values observed on a resource.
///
/// Deserialization is untagged: JSON booleans, integers, floats, RFC 3339
/// strings, plain strings, and string arrays map onto the variants in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Set(BTreeSet<String>),
}

/// Declared type of an attribute, used by the rule compiler for type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Set,
}

impl ValueType {
    /// Whether `<`/`>` comparisons are meaningful for this type.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            ValueType::Integer | ValueType::Float | ValueType::Timestamp | ValueType::String
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::Float => write!(f, "float"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Timestamp => write!(f, "timestamp"),
            ValueType::Set => write!(f, "set"),
        }
    }
}

impl AttributeValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            AttributeValue::Boolean(_) => ValueType::Boolean,
            AttributeValue::Integer(_) => ValueType::Integer,
            AttributeValue::Float(_) => ValueType::Float,
            AttributeValue::Timestamp(_) => ValueType::Timestamp,
            AttributeValue::String(_) => ValueType::String,
            AttributeValue::Set(_) => ValueType::Set,
        }
    }

    /// Extract as string, returning None for every other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Feed a type-tagged canonical byte form into `hasher`.
    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            AttributeValue::Boolean(b) => {
                hasher.update([b'b', *b as u8]);
            }
            AttributeValue::Integer(i) => {
                hasher.update([b'i']);
                hasher.update(i.to_be_bytes());
            }
            AttributeValue::Float(v) => {
                hasher.update([b'f']);
                hasher.update(v.to_bits().to_be_bytes());
            }
            AttributeValue::Timestamp(ts) => {
                hasher.update([b't']);
                hasher.update(ts.timestamp_nanos_opt().unwrap_or(i64::MAX).to_be_bytes());
            }
            AttributeValue::String(s) => {
                hasher.update([b's']);
                hasher.update(s.as_bytes());
            }
            AttributeValue::Set(items) => {
                hasher.update([b'S']);
                for item in items {
                    hasher.update(item.as_bytes());
                    hasher.update([0]);
                }
            }
        }
        hasher.update([0]);
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Integer(i) => write!(f, "{i}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            AttributeValue::String(s) => write!(f, "{s:?}"),
            AttributeValue::Set(items) => write!(f, "{items:?}"),
        }
    }
}

/// Convert a JSON value into attributes, flattening nested objects into
/// dotted paths (`{"encryption": {"enabled": true}}` → `encryption.enabled`).
///
/// Nulls are dropped (treated as absent). Arrays become string sets; non-string
/// array items are rendered as JSON text.
pub fn flatten_json(value: &serde_json::Value) -> Attributes {
    let mut out = Attributes::new();
    flatten_into("", value, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &serde_json::Value, out: &mut Attributes) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&path, inner, out);
            }
        }
        Value::Null => {}
        scalar if prefix.is_empty() => {
            tracing::debug!(value = %scalar, "ignoring top-level scalar evidence payload");
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), AttributeValue::Boolean(*b));
        }
        Value::Number(n) => {
            let v = if let Some(i) = n.as_i64() {
                AttributeValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                AttributeValue::Float(f)
            } else {
                AttributeValue::String(n.to_string())
            };
            out.insert(prefix.to_string(), v);
        }
        Value::String(s) => {
            let v = match DateTime::parse_from_rfc3339(s) {
                Ok(ts) => AttributeValue::Timestamp(ts.with_timezone(&Utc)),
                Err(_) => AttributeValue::String(s.clone()),
            };
            out.insert(prefix.to_string(), v);
        }
        Value::Array(items) => {
            let set = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            out.insert(prefix.to_string(), AttributeValue::Set(set));
        }
    }
}

/// Stable hash of resource id, source id, and attribute payload.
///
/// `observed_at` is deliberately not part of the key: re-observing identical
/// attributes is the same logical change.
pub fn compute_dedup_key(resource_id: &str, source_id: &str, attributes: &Attributes) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_id.as_bytes());
    hasher.update([0]);
    hasher.update(source_id.as_bytes());
    hasher.update([0]);
    for (path, value) in attributes {
        hasher.update(path.as_bytes());
        hasher.update([0]);
        value.hash_into(&mut hasher);
    }
    format!("{:x}", hasher.finalize())
}

/// A fact observed about a resource at a point in time.
///
/// Immutable once versioned: a newer version supersedes it, it is never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub resource_id: ResourceId,
    pub source_id: SourceId,
    /// Evidence/resource type used by rule target selectors (`aws.s3.bucket`).
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub observed_at: DateTime<Utc>,
    /// Monotonic per resource, assigned by the pipeline. Zero until assigned.
    #[serde(default)]
    pub version: u64,
}

impl EvidenceRecord {
    pub fn new(
        resource_id: impl Into<String>,
        source_id: impl Into<String>,
        resource_type: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            source_id: source_id.into(),
            resource_type: resource_type.into(),
            attributes,
            observed_at: Utc::now(),
            version: 0,
        }
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn attribute(&self, path: &str) -> Option<&AttributeValue> {
        self.attributes.get(path)
    }
}

/// A change to an [`EvidenceRecord`] travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEvent {
    pub resource_id: ResourceId,
    pub source_id: SourceId,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub observed_at: DateTime<Utc>,
    pub dedup_key: String,
    /// Producer-supplied ordering token; arrival order is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_hint: Option<u64>,
}

impl EvidenceEvent {
    /// Wrap a collected record, computing its dedup key.
    pub fn from_record(record: EvidenceRecord, sequence_hint: Option<u64>) -> Self {
        let dedup_key =
            compute_dedup_key(&record.resource_id, &record.source_id, &record.attributes);
        Self {
            resource_id: record.resource_id,
            source_id: record.source_id,
            resource_type: record.resource_type,
            attributes: record.attributes,
            observed_at: record.observed_at,
            dedup_key,
            sequence_hint,
        }
    }

    /// Materialize the record this event carries at the given pipeline version.
    pub fn to_record(&self, version: u64) -> EvidenceRecord {
        EvidenceRecord {
            resource_id: self.resource_id.clone(),
            source_id: self.source_id.clone(),
            resource_type: self.resource_type.clone(),
            attributes: self.attributes.clone(),
            observed_at: self.observed_at,
            version,
        }
    }
}
