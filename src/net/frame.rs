//! Binary Frame Layout
//!
//! Every WebSocket binary payload starts with a fixed six-byte header:
//! a four-byte magic number, a protocol version byte, and a message kind
//! byte. The payload encoding differs by kind family; this module only
//! deals with the envelope.

/// Frame magic number ("DGN1" big-endian).
pub const MAGIC: u32 = 0x4447_4E31;

/// Wire protocol version. Bumped on any incompatible frame or payload change.
pub const VERSION: u8 = 1;

/// Header length in bytes: magic (4) + version (1) + kind (1).
pub const HEADER_LEN: usize = 6;

/// Message kind carried in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Session control family (JSON payload).
    Control = 1,
    /// Client intent (binary payload).
    Intent = 2,
    /// Per-tick state delta (binary payload).
    Delta = 3,
    /// Full world snapshot (binary payload).
    Snapshot = 4,
}

impl FrameKind {
    /// Parse a kind byte.
    pub fn from_byte(byte: u8) -> Option<FrameKind> {
        match byte {
            1 => Some(FrameKind::Control),
            2 => Some(FrameKind::Intent),
            3 => Some(FrameKind::Delta),
            4 => Some(FrameKind::Snapshot),
            _ => None,
        }
    }
}

/// Frame decoding errors.
///
/// Any of these on a live connection is a protocol violation: the peer is
/// disconnected rather than guessed at.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Bad magic, bad version, or a payload that does not parse.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Kind byte outside the known range.
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Frame shorter than its header.
    #[error("truncated frame")]
    TruncatedPayload,
}

/// Prefix a payload with the frame header.
pub fn wrap(kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.push(VERSION);
    frame.push(kind as u8);
    frame.extend_from_slice(payload);
    frame
}

/// Validate the header and split off the payload.
pub fn unwrap(bytes: &[u8]) -> Result<(FrameKind, &[u8]), DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::TruncatedPayload);
    }
    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != MAGIC {
        return Err(DecodeError::MalformedFrame(format!(
            "bad magic {magic:#010x}"
        )));
    }
    if bytes[4] != VERSION {
        return Err(DecodeError::MalformedFrame(format!(
            "unsupported version {}",
            bytes[4]
        )));
    }
    let kind = FrameKind::from_byte(bytes[5]).ok_or(DecodeError::UnknownMessageType(bytes[5]))?;
    Ok((kind, &bytes[HEADER_LEN..]))
}
