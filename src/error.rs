//! # Error Types
//!
//! Error handling for the TIM session layer.
//!
//! Two enums cover every failure the crate can report:
//! - [`DecodeError`]: a single inbound payload could not be turned into a typed
//!   packet (short read, trailing bytes, unknown variant, decryption failure).
//!   A decode error fails one packet exchange and never the connection.
//! - [`ProtocolError`]: everything else, from transport I/O to handler state
//!   violations such as sending a session packet without a session key.
//!
//! Login outcomes are deliberately *not* errors; see
//! [`LoginResult`](crate::protocol::login::LoginResult).
//!
//! ## Example Usage
//! ```rust
//! use tim_protocol::error::{DecodeError, ProtocolError, Result};
//!
//! fn parse_state(byte: u8) -> Result<bool> {
//!     match byte {
//!         0x00 => Ok(true),
//!         0x01 => Ok(false),
//!         other => Err(DecodeError::UnknownVariant {
//!             packet: "Example",
//!             value: other as u32,
//!         }
//!         .into()),
//!     }
//! }
//!
//! assert!(matches!(parse_state(7), Err(ProtocolError::Decode(_))));
//! ```

use serde::Serialize;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NO_SERVER_REACHABLE: &str = "No configured server could be reached";

    /// Handler state errors
    pub const ERR_ALREADY_LOGGED_IN: &str = "Network handler has already been used for a login";
    pub const ERR_CLOSED_DURING_LOGIN: &str = "Network handler was closed during login";
    pub const ERR_NOT_ACTIVE: &str = "Network handler is not active";
    pub const ERR_BOT_CLOSED: &str = "Bot has been closed";

    /// Cryptographic errors
    pub const ERR_RANDOM_SOURCE: &str = "Operating system random source unavailable";

    /// Login handshake errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
    pub const ERR_LOGIN_NONCE_NOT_FOUND: &str = "Login nonce not found";

    /// Argument validation
    pub const ERR_ZERO_ACCOUNT_ID: &str = "Account id must be non-zero";
    pub const ERR_STRING_TOO_LONG: &str = "String exceeds the 65535-byte field limit";
}

/// Failure to turn a raw payload into a typed packet.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DecodeError {
    #[error("unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("{0} trailing bytes after the last field")]
    TrailingBytes(usize),

    #[error("unknown variant {value:#x} for {packet}")]
    UnknownVariant { packet: &'static str, value: u32 },

    #[error("no decoder registered for packet id {0:#06x}")]
    UnknownPacket(u16),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("session payload could not be decrypted")]
    DecryptionFailure,

    #[error("session payload arrived before a session key was established")]
    MissingSessionKey,

    #[error("malformed frame: {0}")]
    InvalidFrame(String),
}

/// ProtocolError is the primary error type for all session operations
#[derive(Error, Debug, Serialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing)]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Timeout occurred")]
    Timeout,

    #[error("Network handler closed")]
    HandlerClosed,

    #[error("No session key: the handler has not completed login")]
    NoSessionKey,

    #[error("Packet was sealed with a stale session key")]
    StaleSessionKey,

    #[error("Sequence id {0} is already awaiting a response")]
    SequenceIdInUse(u16),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
