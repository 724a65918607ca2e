//! Execution identifiers (request and transaction ids).
//!
//! Uses UUID v7 so ids sort by creation time in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one dispatch attempt or transaction.
///
/// Every attempt gets a fresh request id, distinct from the subscription id,
/// so logs and traces can tell retries apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    /// Generate a new id (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Milliseconds since Unix epoch encoded in the v7 id
    pub fn timestamp_ms(&self) -> Option<u64> {
        let bytes = self.0.as_bytes();
        if (bytes[6] >> 4) != 7 {
            return None;
        }
        let ts = bytes[..6]
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        Some(ts)
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ExecutionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_distinct() {
        assert_ne!(ExecutionId::new(), ExecutionId::new());
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = ExecutionId::new();
        assert_eq!(ExecutionId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_timestamp_extraction() {
        let ts = ExecutionId::new().timestamp_ms().unwrap();
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        assert!((ts as i64 - now_ms as i64).abs() < 1000);
    }

    #[test]
    fn test_non_v7_has_no_timestamp() {
        assert!(ExecutionId::from(Uuid::nil()).timestamp_ms().is_none());
    }
}
