//! Little-endian wire codec: pooled writers and borrowing readers.
//!
//! Every scalar has an explicit byte layout so client and server builds agree
//! on the wire without a schema compiler. Strings carry a u16 byte-length
//! prefix (hard-capped at 65535); opaque byte blocks carry an i32 prefix.

use ironveil_core::{Direction, EntityId, InvalidDirection, Position2, Position3, Rgba};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Hard protocol cap on an encoded string's UTF-8 byte length.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Codec failure conditions.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Read requested more bytes than the range holds.
    #[error("unexpected end of data: wanted {wanted} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the read needed.
        wanted: usize,
        /// Bytes left in the range.
        remaining: usize,
    },
    /// String exceeds the u16-prefixed wire limit.
    #[error("string of {0} bytes exceeds the {MAX_STRING_LEN}-byte wire limit")]
    StringTooLong(usize),
    /// Byte block exceeds the i32-prefixed wire limit.
    #[error("byte block of {0} bytes exceeds the i32 wire limit")]
    BlockTooLong(usize),
    /// Byte-block length prefix was negative.
    #[error("negative byte block length: {0}")]
    NegativeBlockLength(i32),
    /// String bytes were not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// Unknown direction tag on the wire.
    #[error(transparent)]
    InvalidDirection(#[from] InvalidDirection),
}

/// Shared pool of reusable write buffers.
///
/// Writers take a buffer on construction and hand it back on drop, so hot
/// paths reuse capacity instead of reallocating per message.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// An empty shared pool.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of idle buffers currently pooled.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn take(&self) -> Vec<u8> {
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default()
    }

    fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.free.lock().unwrap_or_else(|e| e.into_inner()).push(buf);
    }
}

/// Append-only encoder over a pooled buffer.
///
/// One writer per in-flight message; a writer is never shared across
/// concurrent encoders. The buffer returns to its pool when the writer drops,
/// and the move on drop makes use-after-close unrepresentable.
pub struct PacketWriter {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PacketWriter {
    /// Acquire a buffer from `pool` and start encoding at offset zero.
    pub fn new(pool: &Arc<BufferPool>) -> Self {
        Self {
            buf: pool.take(),
            pool: Arc::clone(pool),
        }
    }

    /// Encoded bytes so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written since construction or the last reset.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Rewind to offset zero, keeping the buffer's capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Append an unsigned byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a signed byte.
    pub fn write_i8(&mut self, value: i8) {
        self.buf.push(value as u8);
    }

    /// Append a little-endian u16.
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian i16.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u64.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian IEEE-754 single.
    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian IEEE-754 double.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a bool as one byte (0 or 1).
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    /// Append a u16 byte-length prefix and the string's UTF-8 bytes.
    ///
    /// Fails if the encoding exceeds [`MAX_STRING_LEN`] bytes; the limit is a
    /// hard protocol cap, never a silent truncation.
    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        if bytes.len() > MAX_STRING_LEN {
            return Err(CodecError::StringTooLong(bytes.len()));
        }
        self.write_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Append an i32 length prefix and the raw block bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), CodecError> {
        if value.len() > i32::MAX as usize {
            return Err(CodecError::BlockTooLong(value.len()));
        }
        self.write_i32(value.len() as i32);
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// Append a packed entity identity as a plain u64.
    pub fn write_entity_id(&mut self, id: EntityId) {
        self.write_u64(id.0);
    }

    /// Append a 2D position as two f32s.
    pub fn write_position2(&mut self, position: Position2) {
        self.write_f32(position.x);
        self.write_f32(position.y);
    }

    /// Append a 3D position as three f32s.
    pub fn write_position3(&mut self, position: Position3) {
        self.write_f32(position.x);
        self.write_f32(position.y);
        self.write_f32(position.z);
    }

    /// Append a facing as its one-byte tag.
    pub fn write_direction(&mut self, direction: Direction) {
        self.write_u8(direction as u8);
    }

    /// Append a color as four channel bytes.
    pub fn write_rgba(&mut self, color: Rgba) {
        self.write_u8(color.r);
        self.write_u8(color.g);
        self.write_u8(color.b);
        self.write_u8(color.a);
    }
}

impl Drop for PacketWriter {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

/// Checked decoder over a fully-received byte range.
///
/// The reader borrows the bytes and never mutates them. Each instance owns a
/// private cursor, so concurrent reads of one range use separate readers.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the cursor has consumed the whole range.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < wanted {
            return Err(CodecError::UnexpectedEof {
                wanted,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + wanted];
        self.pos += wanted;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        Ok(bytes)
    }

    /// Read an unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Read a signed byte.
    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian i16.
    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian i32.
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian IEEE-754 single.
    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian IEEE-754 double.
    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read a one-byte bool (any nonzero byte is true).
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a u16-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    /// Read an i32-prefixed raw byte block.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeBlockLength(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Read a packed entity identity.
    pub fn read_entity_id(&mut self) -> Result<EntityId, CodecError> {
        Ok(EntityId(self.read_u64()?))
    }

    /// Read a 2D position.
    pub fn read_position2(&mut self) -> Result<Position2, CodecError> {
        Ok(Position2 {
            x: self.read_f32()?,
            y: self.read_f32()?,
        })
    }

    /// Read a 3D position.
    pub fn read_position3(&mut self) -> Result<Position3, CodecError> {
        Ok(Position3 {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        })
    }

    /// Read a one-byte facing tag.
    pub fn read_direction(&mut self) -> Result<Direction, CodecError> {
        Ok(Direction::try_from(self.read_u8()?)?)
    }

    /// Read a four-byte color.
    pub fn read_rgba(&mut self) -> Result<Rgba, CodecError> {
        Ok(Rgba {
            r: self.read_u8()?,
            g: self.read_u8()?,
            b: self.read_u8()?,
            a: self.read_u8()?,
        })
    }
}
