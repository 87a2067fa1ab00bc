//! Packet identity and outgoing packets.
//!
//! A packet type is identified by a numeric command id ([`PacketId`]) and
//! carries [`PacketVersion`] metadata naming the client release whose byte
//! layout it reproduces. Outgoing packets are built once, immutable, and sent
//! exactly once.
//!
//! Session-scoped packets are assembled by [`build_session_packet`]:
//!
//! ```text
//! [bot id(4)] [fix_ver2(3)] [sealed body(N)]
//! ```
//!
//! The sealed body is the packet's fields encrypted with the current
//! [`SessionKey`]. The key's generation is recorded on the packet so the
//! handler can refuse it if the session has been replaced since.

use std::fmt;

use bytes::Bytes;

use crate::core::io::PacketWriter;
use crate::error::Result;
use crate::utils::crypto::SessionKey;

/// Per-request correlation id
pub type SequenceId = u16;

/// Fixed bytes written after the bot id in session packets
pub const FIX_VER2: [u8; 3] = [0x02, 0x00, 0x00];

/// Numeric command id of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub u16);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Whether a packet's body is encrypted with the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketScope {
    /// Sent before a session exists (login handshake)
    Plain,
    /// Body sealed with the session key
    Session,
}

/// Packets this crate can encode or decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum KnownPacketId {
    Login = 0x0836,
    Heartbeat = 0x0058,
    CanAddFriend = 0x00A7,
    AddFriend = 0x00A8,
    QueryPreviousName = 0x01BC,
    ServerEvent = 0x00CE,
}

impl KnownPacketId {
    pub const ALL: [KnownPacketId; 6] = [
        KnownPacketId::Login,
        KnownPacketId::Heartbeat,
        KnownPacketId::CanAddFriend,
        KnownPacketId::AddFriend,
        KnownPacketId::QueryPreviousName,
        KnownPacketId::ServerEvent,
    ];

    pub const fn id(self) -> PacketId {
        PacketId(self as u16)
    }

    pub fn from_id(id: PacketId) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            KnownPacketId::Login => "Login",
            KnownPacketId::Heartbeat => "Heartbeat",
            KnownPacketId::CanAddFriend => "CanAddFriend",
            KnownPacketId::AddFriend => "AddFriend",
            KnownPacketId::QueryPreviousName => "QueryPreviousName",
            KnownPacketId::ServerEvent => "ServerEvent",
        }
    }

    pub const fn scope(self) -> PacketScope {
        match self {
            KnownPacketId::Login => PacketScope::Plain,
            _ => PacketScope::Session,
        }
    }
}

/// Client release a packet layout was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketVersion {
    /// Capture date, `YYYY.MM.DD`
    pub date: &'static str,
    /// TIM client version
    pub tim_version: &'static str,
}

impl fmt::Display for PacketVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (TIM {})", self.date, self.tim_version)
    }
}

/// How an outgoing packet's body was keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Plain,
    Session { generation: u64 },
}

/// Encoded packet ready for the transport
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    name: &'static str,
    id: PacketId,
    sequence_id: SequenceId,
    payload: Bytes,
    key_scope: KeyScope,
}

impl OutgoingPacket {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn key_scope(&self) -> KeyScope {
        self.key_scope
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            id: self.id,
            sequence_id: self.sequence_id,
            payload: self.payload.clone(),
        }
    }
}

/// Build a plaintext packet.
pub fn build_outgoing_packet<F>(
    packet: KnownPacketId,
    sequence_id: SequenceId,
    body: F,
) -> Result<OutgoingPacket>
where
    F: FnOnce(&mut PacketWriter) -> Result<()>,
{
    let mut writer = PacketWriter::new();
    body(&mut writer)?;

    Ok(OutgoingPacket {
        name: packet.name(),
        id: packet.id(),
        sequence_id,
        payload: writer.freeze(),
        key_scope: KeyScope::Plain,
    })
}

/// Build a session packet: fields written by `body` are sealed with `key`.
pub fn build_session_packet<F>(
    packet: KnownPacketId,
    sequence_id: SequenceId,
    bot: u32,
    key: &SessionKey,
    body: F,
) -> Result<OutgoingPacket>
where
    F: FnOnce(&mut PacketWriter) -> Result<()>,
{
    let mut inner = PacketWriter::new();
    body(&mut inner)?;
    let sealed = key.seal(inner.as_slice())?;

    let mut writer = PacketWriter::with_capacity(4 + FIX_VER2.len() + sealed.len());
    writer.write_qq(bot);
    writer.write_bytes(&FIX_VER2);
    writer.write_bytes(&sealed);

    Ok(OutgoingPacket {
        name: packet.name(),
        id: packet.id(),
        sequence_id,
        payload: writer.freeze(),
        key_scope: KeyScope::Session {
            generation: key.generation(),
        },
    })
}

/// One unit on the wire, before payload decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: PacketId,
    pub sequence_id: SequenceId,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: PacketId, sequence_id: SequenceId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            sequence_id,
            payload: payload.into(),
        }
    }
}
