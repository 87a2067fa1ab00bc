//! Unsolicited server packets.
//!
//! ```text
//! [kind(2)] then
//!   0x0001 friend message:  [from(4)] [text(LV)]
//!   0x0002 group message:   [group(4)] [from(4)] [text(LV)]
//!   0x0003 friend request:  [from(4)] [message(LV)]
//! ```

use bytes::Bytes;
use serde::Serialize;

use crate::core::io::{PacketReader, PacketWriter};
use crate::error::{DecodeError, Result};

const FRIEND_MESSAGE: u16 = 0x0001;
const GROUP_MESSAGE: u16 = 0x0002;
const FRIEND_REQUEST: u16 = 0x0003;

/// Something the server pushed without being asked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServerEvent {
    FriendMessage { from: u32, text: String },
    GroupMessage { group: u32, from: u32, text: String },
    FriendRequest { from: u32, message: String },
}

impl ServerEvent {
    pub fn decode(reader: &mut PacketReader<'_>) -> std::result::Result<Self, DecodeError> {
        let event = match reader.read_u16()? {
            FRIEND_MESSAGE => ServerEvent::FriendMessage {
                from: reader.read_qq()?,
                text: reader.read_u16_lv_string()?,
            },
            GROUP_MESSAGE => ServerEvent::GroupMessage {
                group: reader.read_u32()?,
                from: reader.read_qq()?,
                text: reader.read_u16_lv_string()?,
            },
            FRIEND_REQUEST => ServerEvent::FriendRequest {
                from: reader.read_qq()?,
                message: reader.read_u16_lv_string()?,
            },
            other => {
                return Err(DecodeError::UnknownVariant {
                    packet: "ServerEvent",
                    value: other as u32,
                })
            }
        };
        Ok(event)
    }

    pub fn encode_body(&self) -> Result<Bytes> {
        let mut writer = PacketWriter::new();
        match self {
            ServerEvent::FriendMessage { from, text } => {
                writer.write_u16(FRIEND_MESSAGE);
                writer.write_qq(*from);
                writer.write_u16_lv_string(text)?;
            }
            ServerEvent::GroupMessage { group, from, text } => {
                writer.write_u16(GROUP_MESSAGE);
                writer.write_u32(*group);
                writer.write_qq(*from);
                writer.write_u16_lv_string(text)?;
            }
            ServerEvent::FriendRequest { from, message } => {
                writer.write_u16(FRIEND_REQUEST);
                writer.write_qq(*from);
                writer.write_u16_lv_string(message)?;
            }
        }
        Ok(writer.freeze())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_group_message_layout() {
        let event = ServerEvent::GroupMessage {
            group: 0x10,
            from: 0x20,
            text: "hi".into(),
        };
        let body = event.encode_body().unwrap();
        assert_eq!(
            body.as_ref(),
            &[0, 2, 0, 0, 0, 0x10, 0, 0, 0, 0x20, 0, 2, b'h', b'i']
        );

        let mut reader = PacketReader::new(&body);
        assert_eq!(ServerEvent::decode(&mut reader).unwrap(), event);
        reader.finish().unwrap();
    }

    #[test]
    fn test_unknown_kind() {
        let mut reader = PacketReader::new(&[0x00, 0x09]);
        assert!(matches!(
            ServerEvent::decode(&mut reader),
            Err(DecodeError::UnknownVariant { value: 9, .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_text() {
        let body = [0, 1, 0, 0, 0, 1, 0, 1, 0xFF];
        let mut reader = PacketReader::new(&body);
        assert_eq!(
            ServerEvent::decode(&mut reader).unwrap_err(),
            DecodeError::InvalidUtf8
        );
    }
}
