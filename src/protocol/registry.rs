//! Per-variant decoder table.
//!
//! Maps a packet id to the body decoder and packet version of one protocol
//! variant. The table opens the sealed payload with the session key before the
//! body decoder runs and rejects bodies with bytes left over.

use std::collections::HashMap;

use tracing::trace;

use crate::config::ProtocolVariant;
use crate::core::io::PacketReader;
use crate::core::packet::{Frame, KnownPacketId, PacketId, PacketScope, PacketVersion};
use crate::error::DecodeError;
use crate::protocol::action::{AddFriendPacket, CanAddFriendPacket, QueryPreviousNamePacket};
use crate::protocol::event::ServerEvent;
use crate::protocol::heartbeat::HeartbeatPacket;
use crate::protocol::{DecodeContext, IncomingPacket};

type DecodeFn = fn(&mut PacketReader<'_>) -> Result<IncomingPacket, DecodeError>;

struct CodecEntry {
    packet: KnownPacketId,
    version: PacketVersion,
    decode: DecodeFn,
}

/// Response and event decoders for one protocol variant, keyed by packet id.
/// Built once when a handler is created and read-only afterwards.
pub struct CodecTable {
    variant: ProtocolVariant,
    entries: HashMap<PacketId, CodecEntry>,
}

impl CodecTable {
    pub fn for_variant(variant: ProtocolVariant) -> Self {
        let mut table = Self {
            variant,
            entries: HashMap::new(),
        };

        match variant {
            ProtocolVariant::Tim2_3_2 => {
                table.register(HeartbeatPacket::ID, HeartbeatPacket::VERSION, |r| {
                    HeartbeatPacket::decode(r).map(IncomingPacket::Heartbeat)
                });
                table.register(CanAddFriendPacket::ID, CanAddFriendPacket::VERSION, |r| {
                    CanAddFriendPacket::decode(r).map(IncomingPacket::CanAddFriend)
                });
                table.register(AddFriendPacket::ID, AddFriendPacket::VERSION, |r| {
                    AddFriendPacket::decode(r).map(IncomingPacket::AddFriend)
                });
                table.register(
                    QueryPreviousNamePacket::ID,
                    QueryPreviousNamePacket::VERSION,
                    |r| QueryPreviousNamePacket::decode(r).map(IncomingPacket::PreviousNames),
                );
                table.register(KnownPacketId::ServerEvent, variant.packet_version(), |r| {
                    ServerEvent::decode(r).map(IncomingPacket::Event)
                });
            }
        }

        table
    }

    fn register(&mut self, packet: KnownPacketId, version: PacketVersion, decode: DecodeFn) {
        self.entries.insert(
            packet.id(),
            CodecEntry {
                packet,
                version,
                decode,
            },
        );
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn version_of(&self, id: PacketId) -> Option<PacketVersion> {
        self.entries.get(&id).map(|entry| entry.version)
    }

    /// Open and parse an incoming frame. The whole payload must be consumed.
    pub fn decode(
        &self,
        frame: &Frame,
        ctx: &DecodeContext<'_>,
    ) -> Result<IncomingPacket, DecodeError> {
        let entry = self
            .entries
            .get(&frame.id)
            .ok_or(DecodeError::UnknownPacket(frame.id.0))?;

        trace!(
            bot = ctx.bot,
            packet = entry.packet.name(),
            sequence_id = frame.sequence_id,
            version = %entry.version,
            "Decoding packet"
        );

        let body = match entry.packet.scope() {
            PacketScope::Plain => frame.payload.to_vec(),
            PacketScope::Session => ctx
                .session_key
                .ok_or(DecodeError::MissingSessionKey)?
                .open(&frame.payload)?,
        };

        let mut reader = PacketReader::new(&body);
        let packet = (entry.decode)(&mut reader)?;
        reader.finish()?;
        Ok(packet)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::action::{AddFriendOutcome, AddFriendResponse};
    use crate::utils::crypto::{SessionKey, XChaChaCipher};
    use std::sync::Arc;

    fn table() -> CodecTable {
        CodecTable::for_variant(ProtocolVariant::Tim2_3_2)
    }

    fn ctx(key: Option<&SessionKey>) -> DecodeContext<'_> {
        DecodeContext {
            bot: 1,
            session_key: key,
        }
    }

    #[test]
    fn test_login_is_not_routed() {
        let table = table();
        assert!(!table.contains(KnownPacketId::Login.id()));
        for known in [
            KnownPacketId::Heartbeat,
            KnownPacketId::CanAddFriend,
            KnownPacketId::AddFriend,
            KnownPacketId::QueryPreviousName,
            KnownPacketId::ServerEvent,
        ] {
            assert!(table.contains(known.id()), "{}", known.name());
        }
        assert_eq!(
            table
                .version_of(KnownPacketId::QueryPreviousName.id())
                .unwrap()
                .tim_version,
            "2.3.2.21173"
        );
    }

    #[test]
    fn test_sealed_response_decodes() {
        let key = SessionKey::generate(Arc::new(XChaChaCipher)).unwrap();
        let response = AddFriendResponse {
            target: 42,
            outcome: AddFriendOutcome::WaitingForAgreement,
        };
        let frame = Frame::new(
            KnownPacketId::AddFriend.id(),
            5,
            key.seal(&response.encode_body()).unwrap(),
        );

        match table().decode(&frame, &ctx(Some(&key))).unwrap() {
            IncomingPacket::AddFriend(decoded) => assert_eq!(decoded, response),
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let key = SessionKey::generate(Arc::new(XChaChaCipher)).unwrap();
        let frame = Frame::new(
            KnownPacketId::AddFriend.id(),
            5,
            key.seal(&[0, 0, 0, 1, 0x00, 0xFF]).unwrap(),
        );
        assert_eq!(
            table().decode(&frame, &ctx(Some(&key))).unwrap_err(),
            DecodeError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_missing_key() {
        let frame = Frame::new(KnownPacketId::Heartbeat.id(), 1, vec![0u8; 40]);
        assert_eq!(
            table().decode(&frame, &ctx(None)).unwrap_err(),
            DecodeError::MissingSessionKey
        );
    }

    #[test]
    fn test_wrong_key() {
        let cipher = Arc::new(XChaChaCipher);
        let sealed_with = SessionKey::generate(cipher.clone()).unwrap();
        let other = SessionKey::generate(cipher).unwrap();
        let frame = Frame::new(
            KnownPacketId::Heartbeat.id(),
            1,
            sealed_with.seal(&[]).unwrap(),
        );
        assert_eq!(
            table().decode(&frame, &ctx(Some(&other))).unwrap_err(),
            DecodeError::DecryptionFailure
        );
    }

    #[test]
    fn test_unknown_packet() {
        let frame = Frame::new(PacketId(0x7777), 1, vec![]);
        assert_eq!(
            table().decode(&frame, &ctx(None)).unwrap_err(),
            DecodeError::UnknownPacket(0x7777)
        );
    }
}
