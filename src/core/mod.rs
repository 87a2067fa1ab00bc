//! # Core Protocol Components
//!
//! Low-level framing, packet identity and primitive field encoding.
//!
//! ## Components
//! - **Io**: big-endian field writer and bounds-checked reader
//! - **Packet**: packet ids, version metadata, outgoing packets, session packet builder
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(2)] [Head 0x02(1)] [Version(2)] [Command(2)] [Sequence(2)] [Payload(N)] [Tail 0x03(1)]
//! ```
//!
//! ## Security
//! - Length validated before any payload is sliced
//! - Reader never panics on truncated input
//! - Session bodies are sealed before they reach the frame

pub mod codec;
pub mod io;
pub mod packet;
