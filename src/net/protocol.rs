//! Wire Protocol Messages
//!
//! The messages exchanged between server and clients, and their encoding.
//!
//! Two payload encodings share the frame header: the control family is
//! tagged JSON so that older peers tolerate added fields, while the
//! high-volume state family (intents, deltas, snapshots) is compact binary.

use serde::{Deserialize, Serialize};

use crate::game::delta::StateDelta;
use crate::game::intent::{Intent, RejectReason};
use crate::game::state::{ClientId, EntityId, WorldSnapshot};
use crate::net::frame::{self, DecodeError, FrameKind};

/// Why the server is terminating a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The client violated the protocol (bad frame, out-of-phase message).
    ProtocolError,
    /// No traffic from the client within the timeout threshold.
    Timeout,
    /// The server is shutting down.
    ServerShutdown,
    /// The server is at its session limit.
    Capacity,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectReason::ProtocolError => "protocol error",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ServerShutdown => "server shutting down",
            DisconnectReason::Capacity => "server full",
        };
        f.write_str(s)
    }
}

/// Session control messages (JSON payload, forward compatible).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// First message a client sends after the WebSocket handshake.
    Join {
        /// The wire protocol version the client speaks.
        protocol_version: u8,
        /// Free-form display name, unauthenticated.
        #[serde(default)]
        identity_hint: Option<String>,
    },
    /// Server reply to a successful join.
    Welcome {
        /// The identity the server assigned to this session.
        client_id: ClientId,
        /// The avatar spawned for this client.
        avatar: EntityId,
        /// Tick of the joining snapshot.
        tick: u64,
        /// Full world state to initialize the client's local view.
        snapshot: WorldSnapshot,
    },
    /// Keepalive, sent by idle clients.
    Heartbeat,
    /// Graceful client departure.
    Leave,
    /// A submitted intent was dropped.
    IntentRejected {
        /// Sequence number of the dropped intent.
        seq: u64,
        /// Why it was dropped.
        reason: RejectReason,
    },
    /// Server-initiated session termination. Always the last message.
    Goodbye {
        /// Why the session is being closed.
        reason: DisconnectReason,
    },
}

/// Message encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Control payload failed to serialize.
    #[error("control encode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// State payload failed to serialize.
    #[error("state encode failed: {0}")]
    Binary(#[from] bincode::Error),
}

/// Any message that can cross the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Session control family.
    Control(ControlMessage),
    /// Client intent.
    Intent(Intent),
    /// Per-tick state delta.
    Delta(StateDelta),
    /// Full world snapshot (join or resync).
    Snapshot(WorldSnapshot),
}

impl Message {
    /// Encode into a framed byte buffer.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let (kind, payload) = match self {
            Message::Control(msg) => (FrameKind::Control, serde_json::to_vec(msg)?),
            Message::Intent(intent) => (FrameKind::Intent, bincode::serialize(intent)?),
            Message::Delta(delta) => (FrameKind::Delta, bincode::serialize(delta)?),
            Message::Snapshot(snap) => (FrameKind::Snapshot, bincode::serialize(snap)?),
        };
        Ok(frame::wrap(kind, &payload))
    }

    /// Decode a framed byte buffer.
    pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
        let (kind, payload) = frame::unwrap(bytes)?;
        match kind {
            FrameKind::Control => serde_json::from_slice(payload)
                .map(Message::Control)
                .map_err(|e| DecodeError::MalformedFrame(format!("control payload: {e}"))),
            FrameKind::Intent => bincode::deserialize(payload)
                .map(Message::Intent)
                .map_err(|e| DecodeError::MalformedFrame(format!("intent payload: {e}"))),
            FrameKind::Delta => bincode::deserialize(payload)
                .map(Message::Delta)
                .map_err(|e| DecodeError::MalformedFrame(format!("delta payload: {e}"))),
            FrameKind::Snapshot => bincode::deserialize(payload)
                .map(Message::Snapshot)
                .map_err(|e| DecodeError::MalformedFrame(format!("snapshot payload: {e}"))),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
