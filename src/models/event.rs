use serde::{Deserialize, Serialize};

use super::object::TypedObject;
use super::triple::Triple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcEventKind {
    Insert,
    Update,
    Delete,
}

/// One change-data-capture event emitted by the index maintainer hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcEvent {
    #[serde(rename = "type")]
    pub kind: CdcEventKind,
    pub triple: Triple,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<TypedObject>,
    pub timestamp: i64,
}

/// Shard <-> coordinator protocol. JSON messages framed over a bidirectional
/// stream; one semantic operation per message. Sequences travel as decimal
/// strings so they survive JSON number precision limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WireMessage {
    Register {
        shard_id: String,
        namespace: String,
        #[serde(with = "seq_string")]
        last_sequence: u64,
    },
    Registered {
        shard_id: String,
    },
    Deregister {
        shard_id: String,
    },
    Cdc {
        shard_id: String,
        events: Vec<CdcEvent>,
        #[serde(with = "seq_string")]
        sequence: u64,
    },
    Ack {
        shard_id: String,
        #[serde(with = "seq_string")]
        sequence: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

mod seq_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>()
            .map_err(|e| D::Error::custom(format!("sequence {raw:?}: {e}")))
    }
}
