use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one running instance.
///
/// Must stay the same for the lifetime of the process and differ between
/// instances running at the same time. Lock rows are matched against it on
/// `renew` and `release`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier. Call once at process start.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A uniquely identified unit of work.
///
/// The payload is never interpreted by the stores; it is persisted and
/// returned exactly as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the creator, immutable once stored
    pub id: String,
    /// Serialized job content
    pub payload: serde_json::Value,
}

impl Job {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}
