//! Networking Layer
//!
//! Everything between the TCP socket and the world actor.
//!
//! ## Module Structure
//!
//! - `frame`: the binary frame envelope
//! - `protocol`: wire messages and their encodings
//! - `channel`: typed transport over one WebSocket connection
//! - `session`: the per-connection session actor
//! - `heartbeat`: the liveness monitor
//! - `server`: listener, accept loop, and server lifecycle

pub mod channel;
pub mod frame;
pub mod heartbeat;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export key types
pub use channel::{Channel, ChannelError};
pub use frame::{DecodeError, FrameKind};
pub use heartbeat::MonitorConfig;
pub use protocol::{ControlMessage, DisconnectReason, EncodeError, Message};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{SessionConfig, SessionControl, SessionHandle, SessionPhase, SessionRegistry};
