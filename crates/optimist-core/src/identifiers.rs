//! Identifier types for entities and optimistic transactions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transaction identifier correlating a speculative patch with its eventual
/// confirm or revert.
///
/// Generated by the caller, normally a random 128-bit v4 UUID. A ledger
/// refuses to reuse an identifier for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Create a new random transaction ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("tx-").unwrap_or(s);
        Uuid::parse_str(raw).map(Self)
    }
}

impl From<Uuid> for TransactionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<TransactionId> for Uuid {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

/// Opaque entity identifier.
///
/// Remote systems usually hand these out as hex felts or hashes; the engine
/// only compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Create an entity key from any string-like identifier
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_transaction_id_display_parses_back() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        let bare: TransactionId = id.uuid().to_string().parse().unwrap();
        assert_eq!(bare, id);
    }

    #[test]
    fn test_entity_key_serializes_transparently() {
        let key = EntityKey::from("0x1234");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"0x1234\"");
        assert_eq!(key.to_string(), "0x1234");
    }
}
