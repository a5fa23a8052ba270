use std::sync::Arc;

use tokio::sync::mpsc;

use super::{CdcReject, Coordinator};
use crate::models::WireMessage;

/// Per-connection protocol state. A session is one shard's stream; the
/// coordinator multiplexes many of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, register not yet seen.
    Open,
    Registered,
    /// At least one cdc batch received.
    Active,
    /// Explicit deregister; outstanding events drain at the next flush.
    Draining,
    Closed,
}

fn error(code: &str, message: impl Into<String>) -> WireMessage {
    WireMessage::Error {
        code: code.to_string(),
        message: message.into(),
    }
}

/// Drives the session state machine. Replies returned from `handle` go back
/// on this shard's stream; acks arrive later through the outbound channel
/// registered with the coordinator.
pub struct Session {
    coordinator: Arc<Coordinator>,
    state: SessionState,
    shard_id: Option<String>,
    outbound: mpsc::UnboundedSender<WireMessage>,
}

impl Session {
    pub fn new(
        coordinator: Arc<Coordinator>,
        outbound: mpsc::UnboundedSender<WireMessage>,
    ) -> Self {
        Session {
            coordinator,
            state: SessionState::Open,
            shard_id: None,
            outbound,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn shard_id(&self) -> Option<&str> {
        self.shard_id.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Draining | SessionState::Closed)
    }

    pub fn handle(&mut self, message: WireMessage) -> Vec<WireMessage> {
        match message {
            WireMessage::Register {
                shard_id,
                namespace,
                last_sequence,
            } => {
                if self.state != SessionState::Open {
                    return vec![error("protocol", "already registered")];
                }
                match self.coordinator.register(
                    &shard_id,
                    &namespace,
                    last_sequence,
                    self.outbound.clone(),
                ) {
                    Ok(reply) => {
                        self.state = SessionState::Registered;
                        self.shard_id = Some(shard_id);
                        vec![reply]
                    }
                    Err(e) => vec![error(e.wire_code(), e.to_string())],
                }
            }

            WireMessage::Cdc {
                shard_id,
                events,
                sequence,
            } => {
                if !matches!(self.state, SessionState::Registered | SessionState::Active) {
                    return vec![error("protocol", "register required before cdc")];
                }
                if self.shard_id.as_deref() != Some(shard_id.as_str()) {
                    return vec![error("protocol", "cdc shard id does not match session")];
                }
                match self.coordinator.accept_cdc(&shard_id, events, sequence) {
                    Ok(()) => {
                        self.state = SessionState::Active;
                        Vec::new()
                    }
                    Err(CdcReject::OutOfOrder { last }) => vec![error(
                        "sequence",
                        format!("sequence {sequence} is not greater than {last}"),
                    )],
                    Err(CdcReject::Overload) => {
                        vec![error("overload", "pending queue is full, back off")]
                    }
                    Err(CdcReject::NotRegistered) => {
                        vec![error("not_registered", "shard registration not found")]
                    }
                }
            }

            WireMessage::Deregister { shard_id } => {
                if self.shard_id.as_deref() != Some(shard_id.as_str()) {
                    return vec![error("protocol", "deregister shard id does not match session")];
                }
                self.coordinator.deregister(&shard_id);
                self.state = SessionState::Draining;
                Vec::new()
            }

            // A shard-sent error is advisory and never tears the session
            // down from our side.
            WireMessage::Error { code, message } => {
                tracing::warn!(
                    "shard {:?} reported error {code}: {message}",
                    self.shard_id
                );
                Vec::new()
            }

            WireMessage::Registered { .. } | WireMessage::Ack { .. } => {
                vec![error("protocol", "unexpected coordinator-bound message")]
            }
        }
    }

    /// Transport close. From `Registered`/`Active` this is an implicit
    /// deregister: the registration is dropped after a grace period and
    /// buffered events flush in the next cycle.
    pub fn handle_close(&mut self) {
        if matches!(self.state, SessionState::Registered | SessionState::Active) {
            if let Some(shard_id) = &self.shard_id {
                self.coordinator.disconnect(shard_id);
            }
        }
        self.state = SessionState::Closed;
    }
}
