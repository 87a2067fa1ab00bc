//! Contact actions: add-friend probe, add-friend request and the
//! previous-name lookup.
//!
//! All three are session packets. Request bodies (before sealing):
//!
//! ```text
//! CanAddFriend:       [target(4)]
//! AddFriend:          [01 00 01] [target(4)]
//! QueryPreviousName:  [00 00] [bot(4)] [target(4)]
//! ```

use bytes::Bytes;

use crate::core::io::{PacketReader, PacketWriter};
use crate::core::packet::{
    build_session_packet, KnownPacketId, OutgoingPacket, PacketVersion, SequenceId,
};
use crate::error::{DecodeError, Result};
use crate::utils::crypto::SessionKey;

const TIM_2_3_2: PacketVersion = PacketVersion {
    date: "2019.11.02",
    tim_version: "2.3.2.21173",
};

/// Bodies above this length carry the friend info block of an existing friend.
const ALREADY_ADDED_MIN_LEN: usize = 20;

// ---------------------------------------------------------------------------
// CanAddFriend
// ---------------------------------------------------------------------------

/// Asks whether `target` can be added and how.
pub struct CanAddFriendPacket;

impl CanAddFriendPacket {
    pub const ID: KnownPacketId = KnownPacketId::CanAddFriend;
    pub const VERSION: PacketVersion = TIM_2_3_2;

    pub fn encode(
        bot: u32,
        target: u32,
        sequence_id: SequenceId,
        key: &SessionKey,
    ) -> Result<OutgoingPacket> {
        build_session_packet(Self::ID, sequence_id, bot, key, |w| {
            w.write_qq(target);
            Ok(())
        })
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> std::result::Result<CanAddFriendResponse, DecodeError> {
        if reader.remaining() > ALREADY_ADDED_MIN_LEN {
            let target = reader.read_qq()?;
            // Friend info block; nothing in it is needed yet.
            reader.read_remaining();
            return Ok(CanAddFriendResponse::AlreadyAdded { target });
        }

        let target = reader.read_qq()?;
        let state = reader.read_u8()?;
        let response = match state {
            0x00 => CanAddFriendResponse::ReadyToAdd { target },
            0x01 => CanAddFriendResponse::RequireVerification { target },
            0x99 => CanAddFriendResponse::AlreadyAdded { target },
            0x03 | 0x04 => CanAddFriendResponse::Rejected { target },
            other => {
                return Err(DecodeError::UnknownVariant {
                    packet: "CanAddFriendResponse",
                    value: other as u32,
                })
            }
        };
        Ok(response)
    }
}

/// How the server says `target` may be added
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanAddFriendResponse {
    AlreadyAdded { target: u32 },
    /// A verification message has to accompany the request
    RequireVerification { target: u32 },
    ReadyToAdd { target: u32 },
    /// The target does not accept friend requests
    Rejected { target: u32 },
}

impl CanAddFriendResponse {
    pub fn target(&self) -> u32 {
        match *self {
            CanAddFriendResponse::AlreadyAdded { target }
            | CanAddFriendResponse::RequireVerification { target }
            | CanAddFriendResponse::ReadyToAdd { target }
            | CanAddFriendResponse::Rejected { target } => target,
        }
    }

    /// Server side: short-form body
    pub fn encode_body(&self) -> Bytes {
        let mut writer = PacketWriter::with_capacity(5);
        writer.write_qq(self.target());
        writer.write_u8(match self {
            CanAddFriendResponse::ReadyToAdd { .. } => 0x00,
            CanAddFriendResponse::RequireVerification { .. } => 0x01,
            CanAddFriendResponse::Rejected { .. } => 0x03,
            CanAddFriendResponse::AlreadyAdded { .. } => 0x99,
        });
        writer.freeze()
    }
}

// ---------------------------------------------------------------------------
// AddFriend
// ---------------------------------------------------------------------------

/// Adds `target` directly; valid after a `ReadyToAdd` probe.
pub struct AddFriendPacket;

impl AddFriendPacket {
    pub const ID: KnownPacketId = KnownPacketId::AddFriend;
    pub const VERSION: PacketVersion = TIM_2_3_2;

    pub fn encode(
        bot: u32,
        target: u32,
        sequence_id: SequenceId,
        key: &SessionKey,
    ) -> Result<OutgoingPacket> {
        build_session_packet(Self::ID, sequence_id, bot, key, |w| {
            w.write_bytes(&[0x01, 0x00, 0x01]);
            w.write_qq(target);
            Ok(())
        })
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> std::result::Result<AddFriendResponse, DecodeError> {
        let target = reader.read_qq()?;
        let outcome = match reader.read_u8()? {
            0x00 => AddFriendOutcome::Added,
            0x01 => AddFriendOutcome::WaitingForAgreement,
            0x02 => AddFriendOutcome::Rejected,
            other => {
                return Err(DecodeError::UnknownVariant {
                    packet: "AddFriendResponse",
                    value: other as u32,
                })
            }
        };
        Ok(AddFriendResponse { target, outcome })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFriendOutcome {
    Added,
    WaitingForAgreement,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddFriendResponse {
    pub target: u32,
    pub outcome: AddFriendOutcome,
}

impl AddFriendResponse {
    pub fn encode_body(&self) -> Bytes {
        let mut writer = PacketWriter::with_capacity(5);
        writer.write_qq(self.target);
        writer.write_u8(match self.outcome {
            AddFriendOutcome::Added => 0x00,
            AddFriendOutcome::WaitingForAgreement => 0x01,
            AddFriendOutcome::Rejected => 0x02,
        });
        writer.freeze()
    }
}

// ---------------------------------------------------------------------------
// QueryPreviousName
// ---------------------------------------------------------------------------

/// Looks up the names `target` used before.
pub struct QueryPreviousNamePacket;

impl QueryPreviousNamePacket {
    pub const ID: KnownPacketId = KnownPacketId::QueryPreviousName;
    pub const VERSION: PacketVersion = TIM_2_3_2;

    pub fn encode(
        bot: u32,
        target: u32,
        sequence_id: SequenceId,
        key: &SessionKey,
    ) -> Result<OutgoingPacket> {
        build_session_packet(Self::ID, sequence_id, bot, key, |w| {
            w.write_zero(2);
            w.write_qq(bot);
            w.write_qq(target);
            Ok(())
        })
    }

    pub fn decode(
        reader: &mut PacketReader<'_>,
    ) -> std::result::Result<PreviousNameList, DecodeError> {
        Ok(PreviousNameList {
            names: reader.read_string_array()?,
        })
    }
}

/// Oldest first, as the server lists them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviousNameList {
    pub names: Vec<String>,
}

impl PreviousNameList {
    pub fn encode_body(&self) -> Result<Bytes> {
        let mut writer = PacketWriter::new();
        writer.write_string_array(&self.names)?;
        Ok(writer.freeze())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::{KeyScope, FIX_VER2};
    use crate::utils::crypto::XChaChaCipher;
    use std::sync::Arc;

    fn key() -> SessionKey {
        SessionKey::generate(Arc::new(XChaChaCipher)).unwrap()
    }

    fn opened_body(packet: &OutgoingPacket, key: &SessionKey, bot: u32) -> Vec<u8> {
        let mut reader = PacketReader::new(packet.payload());
        assert_eq!(reader.read_qq().unwrap(), bot);
        assert_eq!(reader.read_array::<3>().unwrap(), FIX_VER2);
        key.open(reader.read_remaining()).unwrap()
    }

    #[test]
    fn test_add_friend_body() {
        let key = key();
        let packet = AddFriendPacket::encode(10, 0x0102_0304, 3, &key).unwrap();
        assert_eq!(packet.id(), KnownPacketId::AddFriend.id());
        assert_eq!(
            opened_body(&packet, &key, 10),
            vec![0x01, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn test_query_previous_name_body() {
        let key = key();
        let packet = QueryPreviousNamePacket::encode(0x0A, 0x0B, 9, &key).unwrap();
        assert_eq!(
            packet.key_scope(),
            KeyScope::Session {
                generation: key.generation()
            }
        );
        assert_eq!(
            opened_body(&packet, &key, 0x0A),
            vec![0, 0, 0, 0, 0, 0x0A, 0, 0, 0, 0x0B]
        );
    }

    #[test]
    fn test_can_add_states() {
        let cases = [
            (0x00u8, CanAddFriendResponse::ReadyToAdd { target: 5 }),
            (0x01, CanAddFriendResponse::RequireVerification { target: 5 }),
            (0x99, CanAddFriendResponse::AlreadyAdded { target: 5 }),
            (0x03, CanAddFriendResponse::Rejected { target: 5 }),
            (0x04, CanAddFriendResponse::Rejected { target: 5 }),
        ];
        for (state, expected) in cases {
            let body = [0, 0, 0, 5, state];
            let mut reader = PacketReader::new(&body);
            assert_eq!(CanAddFriendPacket::decode(&mut reader).unwrap(), expected);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn test_can_add_long_form_is_already_added() {
        let mut body = vec![0, 0, 0, 7];
        body.extend_from_slice(&[0xEE; 30]);
        let mut reader = PacketReader::new(&body);
        assert_eq!(
            CanAddFriendPacket::decode(&mut reader).unwrap(),
            CanAddFriendResponse::AlreadyAdded { target: 7 }
        );
        reader.finish().unwrap();
    }

    #[test]
    fn test_can_add_unknown_state() {
        let mut reader = PacketReader::new(&[0, 0, 0, 1, 0x42]);
        assert_eq!(
            CanAddFriendPacket::decode(&mut reader).unwrap_err(),
            DecodeError::UnknownVariant {
                packet: "CanAddFriendResponse",
                value: 0x42
            }
        );
    }

    #[test]
    fn test_previous_names_decode() {
        let body = [
            0, 0, 0, 2, // count
            0, 0, 0, 3, b'o', b'l', b'd', // first
            0, 0, 0, 0, // empty name
        ];
        let mut reader = PacketReader::new(&body);
        let list = QueryPreviousNamePacket::decode(&mut reader).unwrap();
        assert_eq!(list.names, vec!["old".to_string(), String::new()]);
        reader.finish().unwrap();
    }

    #[test]
    fn test_previous_names_truncated() {
        let body = [0, 0, 0, 2, 0, 0, 0, 1, b'a'];
        let mut reader = PacketReader::new(&body);
        assert!(matches!(
            QueryPreviousNamePacket::decode(&mut reader),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }
}
