//! Primitive field encoding.
//!
//! All integers are big-endian. Strings are UTF-8 prefixed with a `u16` byte
//! length. String arrays carry a `u32` count followed by entries of
//! `[2 reserved bytes][u16-LV string]`.
//!
//! [`PacketReader`] never panics on short input: every read is bounds-checked
//! and reports [`DecodeError::UnexpectedEof`]. Decoders finish with
//! [`PacketReader::finish`] so that bytes left behind surface as
//! [`DecodeError::TrailingBytes`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{constants, DecodeError, ProtocolError, Result};

/// Growable buffer with the protocol's field writers
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Account and contact ids are 4-byte unsigned integers.
    pub fn write_qq(&mut self, id: u32) {
        self.buf.put_u32(id);
    }

    /// Reserved block of `count` zero bytes.
    pub fn write_zero(&mut self, count: usize) {
        self.buf.put_bytes(0, count);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// `[u16 length][utf-8 bytes]`
    pub fn write_u16_lv_string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            ProtocolError::InvalidArgument(constants::ERR_STRING_TOO_LONG.into())
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// `[u32 count]` then `count` entries of `[zero 2][u16-LV string]`
    pub fn write_string_array<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        let count = u32::try_from(values.len())
            .map_err(|_| ProtocolError::InvalidArgument("too many strings".into()))?;
        self.buf.put_u32(count);
        for value in values {
            self.write_zero(2);
            self.write_u16_lv_string(value.as_ref())?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked cursor over a payload
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> std::result::Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(DecodeError::UnexpectedEof { needed, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> std::result::Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> std::result::Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> std::result::Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_qq(&mut self) -> std::result::Result<u32, DecodeError> {
        self.read_u32()
    }

    pub fn read_bytes(&mut self, count: usize) -> std::result::Result<&'a [u8], DecodeError> {
        self.take(count)
    }

    pub fn read_array<const N: usize>(&mut self) -> std::result::Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Skip `count` bytes that must be present.
    pub fn discard_exact(&mut self, count: usize) -> std::result::Result<(), DecodeError> {
        self.take(count).map(|_| ())
    }

    /// Consume everything left.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    pub fn read_u16_lv_string(&mut self) -> std::result::Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_string_array(&mut self) -> std::result::Result<Vec<String>, DecodeError> {
        let count = self.read_u32()? as usize;
        // Every entry needs at least 4 bytes; cap the allocation by what is present.
        let mut values = Vec::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            self.discard_exact(2)?;
            values.push(self.read_u16_lv_string()?);
        }
        Ok(values)
    }

    /// Assert the payload was fully consumed.
    pub fn finish(self) -> std::result::Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
