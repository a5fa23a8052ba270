use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use super::object::TypedObject;
use crate::error::{GraphError, Result};

/// Lexicographically sortable 26-character ULID. Monotonic within a writer
/// because the leading 48 bits are the millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate() -> Self {
        TransactionId(ulid::Ulid::new().to_string())
    }

    /// Wrap a value previously validated on the write path. Only for reads
    /// from our own storage.
    pub(crate) fn from_trusted(raw: String) -> Self {
        TransactionId(raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let ulid = raw
            .parse::<ulid::Ulid>()
            .map_err(|e| GraphError::Validation(format!("tx id {raw:?}: {e}")))?;
        Ok(TransactionId(ulid.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A versioned triple. `(subject, predicate)` is the MVCC identity; the
/// logical value is the row with the highest `(timestamp, tx_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: EntityId,
    pub predicate: String,
    pub object: TypedObject,
    pub timestamp: i64,
    pub tx_id: TransactionId,
}

impl Triple {
    pub fn new(
        subject: EntityId,
        predicate: impl Into<String>,
        object: TypedObject,
        timestamp: i64,
        tx_id: TransactionId,
    ) -> Self {
        Triple {
            subject,
            predicate: predicate.into(),
            object,
            timestamp,
            tx_id,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.object.is_tombstone()
    }
}

/// Latest-wins assembled view of one subject: the shape the client RPC
/// surface returns. `$id` is carried in `id`, never in `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub properties: BTreeMap<String, TypedObject>,
}

impl Entity {
    pub fn new(id: EntityId) -> Self {
        Entity {
            id,
            properties: BTreeMap::new(),
        }
    }
}
