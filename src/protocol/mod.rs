//! Protocol module - Defines the wire protocol for FrameLink communication
//!
//! Every message is framed as type-length-value:
//! - 1 byte message type
//! - length field (1, 2 or 4 bytes big-endian, fixed per deployment)
//! - Variable length payload

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// Default port for FrameLink communication
pub const DEFAULT_PORT: u16 = 8080;

/// Default host the client connects to
pub const DEFAULT_HOST: &str = "localhost";

/// Message type identifiers used by the registration exchange
pub mod message_types {
    /// Client -> Server: register a name
    pub const NEW_REGISTRATION: u8 = 1;
    /// Server -> Client: registration accepted
    pub const REGISTRATION_OK: u8 = 2;
    /// Server -> Client: registration rejected, payload carries the reason
    pub const REGISTRATION_ERROR: u8 = 3;
}
