//! Remote records and field values.

use crate::error::{ProtocolError, ProtocolResult};
use crate::zone::{ZoneId, DEFAULT_OWNER_NAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a record, shared between the local store and the
/// remote service.
///
/// The id is assigned once when the object is created locally and never
/// regenerated, so pushes and fetches address the same remote row for the
/// lifetime of the object.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier for a newly created object.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A typed field value carried by a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Timestamp in unix milliseconds.
    Timestamp(i64),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Returns the boolean value, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Returns the text value, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the timestamp in unix milliseconds, if this is a `Timestamp`.
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the raw bytes, if this is a `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the name of the value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Bytes(b)
    }
}

/// A record as the remote service sees it: domain fields plus the
/// server-assigned metadata that must survive a local round trip.
///
/// The change tag is the service's optimistic-concurrency version: a save
/// carrying a stale tag is rejected as a conflict. `created_by` identifies
/// the original author, which is how shared records are distinguished from
/// owned ones. A record fetched from the service is cached verbatim as a
/// mirror (`to_mirror_bytes`) so the next outgoing save can be built on the
/// exact skeleton the server handed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Application-level record type.
    pub record_type: String,
    /// Zone the record lives in.
    pub zone: ZoneId,
    /// Server-assigned version tag; `None` until the first save succeeds.
    pub change_tag: Option<String>,
    /// Name of the user who created the record; `None` before first save.
    pub created_by: Option<String>,
    /// Id of the share record governing access, when the record is shared.
    pub share: Option<RecordId>,
    /// Domain fields.
    pub fields: BTreeMap<String, FieldValue>,
}

impl RemoteRecord {
    /// Creates a fresh record skeleton that has never been saved.
    pub fn new(id: RecordId, record_type: impl Into<String>, zone: ZoneId) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            zone,
            change_tag: None,
            created_by: None,
            share: None,
            fields: BTreeMap::new(),
        }
    }

    /// Returns true when the local user authored this record.
    ///
    /// A record that has never been saved has no creator and counts as
    /// owned.
    pub fn is_owned(&self) -> bool {
        match &self.created_by {
            Some(creator) => creator == DEFAULT_OWNER_NAME,
            None => true,
        }
    }

    /// Returns a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Sets a field, replacing any previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Serializes the full record, metadata included, for the mirror cache.
    pub fn to_mirror_bytes(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Reconstitutes a record from mirror bytes.
    pub fn from_mirror_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::codec(e.to_string()))
    }
}
