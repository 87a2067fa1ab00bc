//! Keep-alive packet. The request body is the bot id; the server answers
//! with an empty sealed body.

use crate::core::io::PacketReader;
use crate::core::packet::{
    build_session_packet, KnownPacketId, OutgoingPacket, PacketVersion, SequenceId,
};
use crate::error::{DecodeError, Result};
use crate::utils::crypto::SessionKey;

pub struct HeartbeatPacket;

impl HeartbeatPacket {
    pub const ID: KnownPacketId = KnownPacketId::Heartbeat;
    pub const VERSION: PacketVersion = PacketVersion {
        date: "2019.11.02",
        tim_version: "2.3.2.21173",
    };

    pub fn encode(bot: u32, sequence_id: SequenceId, key: &SessionKey) -> Result<OutgoingPacket> {
        build_session_packet(Self::ID, sequence_id, bot, key, |w| {
            w.write_qq(bot);
            Ok(())
        })
    }

    pub fn decode(_reader: &mut PacketReader<'_>) -> std::result::Result<HeartbeatAck, DecodeError> {
        Ok(HeartbeatAck)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck;
