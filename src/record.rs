//! Record identity and bodies as they travel from the store to the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Store-assigned handle produced by a cursor. Opaque outside the store that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

/// Logical id with its embedded record type, e.g. `Patient/123`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub record_type: String,
    pub id: String,
}

impl RecordId {
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self { record_type: record_type.into(), id: id.into() }
    }

    /// Parse `Type/id`, tolerating a leading base URL and a trailing `/_history/N`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        let unversioned = match trimmed.find("/_history/") {
            Some(pos) => &trimmed[..pos],
            None => trimmed,
        };
        let mut parts = unversioned.rsplitn(2, '/');
        let id = parts.next()?;
        let head = parts.next()?;
        let record_type = head.rsplit('/').next()?;
        if record_type.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(record_type, id))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.id)
    }
}

/// A fully materialized record.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub body: Value,
}

impl Record {
    /// Build from a JSON body carrying `resourceType` and `id`.
    pub fn from_body(body: Value) -> Option<Self> {
        let record_type = resource_type(&body)?.to_string();
        let id = logical_id(&body)?.to_string();
        Some(Self { id: RecordId { record_type, id }, body })
    }

    pub fn record_type(&self) -> &str {
        &self.id.record_type
    }
}

pub fn resource_type(v: &Value) -> Option<&str> {
    v.get("resourceType").and_then(|x| x.as_str())
}

pub fn logical_id(v: &Value) -> Option<&str> {
    v.get("id").and_then(|x| x.as_str())
}
