//! Tokio codec for the TIM wire frame.
//!
//! ```text
//! [Length(2)] [Head 0x02(1)] [Version(2)] [Command(2)] [Sequence(2)] [Payload(N)] [Tail 0x03(1)]
//! ```
//!
//! `Length` counts every byte after itself. The codec checks head, tail and the
//! client version word; payload decryption and field parsing happen later in
//! the protocol registry.
//!
//! Once a length prefix is accepted the codec consumes exactly that many
//! bytes, so a frame with a broken envelope is yielded as a [`RejectedFrame`]
//! and the stream stays aligned. Only a length below the frame overhead is a
//! stream error, since nothing after it can be trusted.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::ProtocolVariant;
use crate::core::packet::{Frame, PacketId, SequenceId};
use crate::error::{DecodeError, ProtocolError};

/// Frame start marker
pub const HEAD: u8 = 0x02;

/// Frame end marker
pub const TAIL: u8 = 0x03;

/// Bytes in a frame besides the payload, excluding the length prefix
pub const FRAME_OVERHEAD: usize = 1 + 2 + 2 + 2 + 1;

/// Largest payload a frame can carry
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - FRAME_OVERHEAD;

/// A length-delimited frame whose envelope failed validation. Command and
/// sequence words are read from their fixed offsets so the exchange they
/// belong to can be failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFrame {
    pub id: PacketId,
    pub sequence_id: SequenceId,
    pub error: DecodeError,
}

/// One decoded unit: a frame, or a rejected frame the stream skipped over
pub type DecodedFrame = Result<Frame, RejectedFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    version: u16,
}

impl FrameCodec {
    pub fn new(variant: ProtocolVariant) -> Self {
        Self {
            version: variant.client_version(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(ProtocolVariant::default())
    }
}

impl Decoder for FrameCodec {
    type Item = DecodedFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if len < FRAME_OVERHEAD {
            return Err(DecodeError::InvalidFrame(format!("length {len} below frame overhead")).into());
        }

        if src.len() < 2 + len {
            src.reserve(2 + len - src.len());
            return Ok(None);
        }

        src.advance(2);
        let body = src.split_to(len).freeze();

        let id = PacketId(u16::from_be_bytes([body[3], body[4]]));
        let sequence_id = u16::from_be_bytes([body[5], body[6]]);
        let reject = |reason: String| {
            Ok(Some(Err(RejectedFrame {
                id,
                sequence_id,
                error: DecodeError::InvalidFrame(reason),
            })))
        };

        if body[0] != HEAD {
            return reject(format!("bad head {:#04x}", body[0]));
        }
        if body[len - 1] != TAIL {
            return reject(format!("bad tail {:#04x}", body[len - 1]));
        }

        let version = u16::from_be_bytes([body[1], body[2]]);
        if version != self.version {
            return reject(format!(
                "client version {version:#06x}, expected {:#06x}",
                self.version
            ));
        }

        let payload = body.slice(7..len - 1);
        Ok(Some(Ok(Frame {
            id,
            sequence_id,
            payload,
        })))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::OversizedPacket(frame.payload.len()));
        }

        let len = FRAME_OVERHEAD + frame.payload.len();
        dst.reserve(2 + len);
        dst.put_u16(len as u16);
        dst.put_u8(HEAD);
        dst.put_u16(self.version);
        dst.put_u16(frame.id.0);
        dst.put_u16(frame.sequence_id);
        dst.put_slice(&frame.payload);
        dst.put_u8(TAIL);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn encoded(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::default().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_frame_layout() {
        let buf = encoded(Frame::new(PacketId(0x01BC), 0x1234, vec![0xAA, 0xBB]));
        assert_eq!(
            &buf[..],
            &[0x00, 0x0A, HEAD, 0x37, 0x13, 0x01, 0xBC, 0x12, 0x34, 0xAA, 0xBB, TAIL]
        );
    }

    #[test]
    fn test_decode_consumes_exactly_one_frame() {
        let mut buf = encoded(Frame::new(PacketId(0x0058), 1, vec![1, 2, 3]));
        buf.extend_from_slice(&encoded(Frame::new(PacketId(0x0058), 2, vec![])));

        let mut codec = FrameCodec::default();
        let first = codec.decode(&mut buf).unwrap().expect("first frame").unwrap();
        assert_eq!(first.sequence_id, 1);
        assert_eq!(first.payload.as_ref(), &[1, 2, 3]);

        let second = codec.decode(&mut buf).unwrap().expect("second frame").unwrap();
        assert_eq!(second.sequence_id, 2);
        assert!(second.payload.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let full = encoded(Frame::new(PacketId(0x0058), 1, vec![9; 16]));
        let mut partial = BytesMut::from(&full[..10]);

        let result = FrameCodec::default().decode(&mut partial).unwrap();
        assert!(result.is_none());
        assert_eq!(partial.len(), 10);
    }

    #[test]
    fn test_bad_tail_rejected() {
        let mut buf = encoded(Frame::new(PacketId(0x0058), 1, vec![1]));
        let last = buf.len() - 1;
        buf[last] = 0xFF;
        match FrameCodec::default().decode(&mut buf) {
            Ok(Some(Err(rejected))) => {
                assert_eq!(rejected.id, PacketId(0x0058));
                assert_eq!(rejected.sequence_id, 1);
                assert!(matches!(rejected.error, DecodeError::InvalidFrame(_)));
            }
            other => panic!("expected rejected frame, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut buf = encoded(Frame::new(PacketId(0x0058), 1, vec![]));
        buf[3] = 0x00;
        assert!(matches!(
            FrameCodec::default().decode(&mut buf),
            Ok(Some(Err(RejectedFrame {
                error: DecodeError::InvalidFrame(_),
                ..
            })))
        ));
    }

    #[test]
    fn test_stream_continues_after_rejected_frame() {
        let mut buf = encoded(Frame::new(PacketId(0x0058), 1, vec![7; 4]));
        let last = buf.len() - 1;
        buf[last] = 0x00;
        buf.extend_from_slice(&encoded(Frame::new(PacketId(0x0058), 2, vec![8])));

        let mut codec = FrameCodec::default();
        assert!(matches!(codec.decode(&mut buf), Ok(Some(Err(_)))));

        let next = codec.decode(&mut buf).unwrap().expect("frame after reject").unwrap();
        assert_eq!(next.sequence_id, 2);
        assert_eq!(next.payload.as_ref(), &[8]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_undersized_length_rejected() {
        let mut buf = BytesMut::from(&[0x00, 0x03, HEAD, 0x00, TAIL][..]);
        assert!(FrameCodec::default().decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = BytesMut::new();
        let result = FrameCodec::default().encode(
            Frame::new(PacketId(0x0058), 1, vec![0u8; MAX_PAYLOAD_SIZE + 1]),
            &mut buf,
        );
        assert!(matches!(result, Err(ProtocolError::OversizedPacket(_))));
    }
}
