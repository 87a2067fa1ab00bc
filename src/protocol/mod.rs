//! # Protocol Packets
//!
//! Typed packets of the TIM 2.3.2 protocol and the table that decodes them.
//!
//! ## Components
//! - **Login**: password proof handshake that yields the session key
//! - **Heartbeat**: keep-alive
//! - **Action**: add-friend probe, add-friend request, previous-name lookup
//! - **Event**: packets the server pushes unasked
//! - **Registry**: per-variant decoder table keyed by packet id
//!
//! Every packet type carries its id and [`PacketVersion`](crate::core::packet::PacketVersion)
//! as associated constants; encoding functions produce an
//! [`OutgoingPacket`](crate::core::packet::OutgoingPacket), decoders read from a
//! [`PacketReader`](crate::core::io::PacketReader) and never see the frame.

pub mod action;
pub mod event;
pub mod heartbeat;
pub mod login;
pub mod registry;

use crate::utils::crypto::SessionKey;

pub use action::{
    AddFriendOutcome, AddFriendResponse, CanAddFriendResponse, PreviousNameList,
};
pub use event::ServerEvent;
pub use heartbeat::HeartbeatAck;
pub use login::{LoginResponse, LoginResult};
pub use registry::CodecTable;

/// What the decoder needs besides the bytes
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub bot: u32,
    pub session_key: Option<&'a SessionKey>,
}

/// A decoded packet from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingPacket {
    Heartbeat(HeartbeatAck),
    CanAddFriend(CanAddFriendResponse),
    AddFriend(AddFriendResponse),
    PreviousNames(PreviousNameList),
    Event(ServerEvent),
}

impl IncomingPacket {
    pub fn name(&self) -> &'static str {
        match self {
            IncomingPacket::Heartbeat(_) => HeartbeatAck::NAME,
            IncomingPacket::CanAddFriend(_) => CanAddFriendResponse::NAME,
            IncomingPacket::AddFriend(_) => AddFriendResponse::NAME,
            IncomingPacket::PreviousNames(_) => PreviousNameList::NAME,
            IncomingPacket::Event(_) => "ServerEvent",
        }
    }

    /// Events are never answers to a request
    pub fn is_event(&self) -> bool {
        matches!(self, IncomingPacket::Event(_))
    }
}

/// A packet type that answers a request
pub trait ResponsePacket: Sized + Send + 'static {
    const NAME: &'static str;

    /// Take the typed response out, or give the packet back if it is another kind.
    fn from_incoming(packet: IncomingPacket) -> Result<Self, IncomingPacket>;
}

macro_rules! response_packet {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl ResponsePacket for $ty {
            const NAME: &'static str = $name;

            fn from_incoming(packet: IncomingPacket) -> Result<Self, IncomingPacket> {
                match packet {
                    IncomingPacket::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }
    };
}

response_packet!(HeartbeatAck, Heartbeat, "HeartbeatAck");
response_packet!(CanAddFriendResponse, CanAddFriend, "CanAddFriendResponse");
response_packet!(AddFriendResponse, AddFriend, "AddFriendResponse");
response_packet!(PreviousNameList, PreviousNames, "PreviousNameList");
