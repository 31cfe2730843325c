//! Seekable, endian-aware byte cursor.
//!
//! All box code reads and writes through [`ByteCursor`]. The default byte
//! order is big-endian, which is what ISO BMFF uses on the wire.

use crate::{Error, Result};
use bytes::{Bytes, BytesMut};

/// Byte order used by a [`ByteCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Network byte order (ISO BMFF).
    #[default]
    Big,
    Little,
}

macro_rules! int_accessors {
    ($($read:ident, $write:ident, $ty:ty;)*) => {
        $(
            pub fn $read(&mut self) -> Result<$ty> {
                let raw = self.take_array::<{ std::mem::size_of::<$ty>() }>()?;
                Ok(match self.endian {
                    Endian::Big => <$ty>::from_be_bytes(raw),
                    Endian::Little => <$ty>::from_le_bytes(raw),
                })
            }

            pub fn $write(&mut self, value: $ty) {
                let raw = match self.endian {
                    Endian::Big => value.to_be_bytes(),
                    Endian::Little => value.to_le_bytes(),
                };
                self.write_bytes(&raw);
            }
        )*
    };
}

/// A byte buffer with a read/write position.
#[derive(Debug, Clone, Default)]
pub struct ByteCursor {
    buf: BytesMut,
    pos: usize,
    endian: Endian,
}

impl ByteCursor {
    /// Create an empty cursor for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cursor with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            pos: 0,
            endian: Endian::Big,
        }
    }

    /// Create a cursor positioned at the start of existing bytes.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
            pos: 0,
            endian: Endian::Big,
        }
    }

    /// Change the byte order used by subsequent multi-byte accesses.
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total buffer length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left between the position and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Move to an absolute position. Seeking past the end is allowed for
    /// writes; reads there fail.
    pub fn seek(&mut self, position: usize) {
        self.pos = position;
    }

    /// Advance the position without reading.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// View of the whole buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the cursor and return the written bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    fn ensure(&self, need: usize) -> Result<()> {
        if self.remaining() < need {
            return Err(Error::BufferUnderflow {
                position: self.pos,
                need,
                have: self.remaining(),
            });
        }
        Ok(())
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    int_accessors! {
        read_u16, write_u16, u16;
        read_u32, write_u32, u32;
        read_u64, write_u64, u64;
        read_i16, write_i16, i16;
        read_i32, write_i32, i32;
        read_i64, write_i64, i64;
        read_f32, write_f32, f32;
        read_f64, write_f64, f64;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let [a, b, c] = self.take_array::<3>()?;
        Ok(match self.endian {
            Endian::Big => u32::from_be_bytes([0, a, b, c]),
            Endian::Little => u32::from_le_bytes([a, b, c, 0]),
        })
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n)?;
        let out = Bytes::copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(out)
    }

    /// Read everything from the position to the end.
    pub fn read_to_end(&mut self) -> Bytes {
        let out = Bytes::copy_from_slice(&self.buf[self.pos.min(self.buf.len())..]);
        self.pos = self.buf.len().max(self.pos);
        out
    }

    /// Read a fixed-size array (four-cc codes, UUIDs).
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.take_array::<N>()
    }

    /// Read a null-terminated string. The terminator is consumed but not
    /// returned. A missing terminator reads to the end of the buffer.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let (text, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        let s = String::from_utf8_lossy(text).into_owned();
        self.pos += consumed;
        Ok(s)
    }

    /// Read a string prefixed by its one-byte length.
    pub fn read_pascal_string(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        let raw = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    pub fn write_u24(&mut self, value: u32) {
        let b = value.to_be_bytes();
        match self.endian {
            Endian::Big => self.write_bytes(&b[1..]),
            Endian::Little => self.write_bytes(&[b[3], b[2], b[1]]),
        }
    }

    /// Write bytes at the position, overwriting and growing the buffer as needed.
    pub fn write_bytes(&mut self, data: &[u8]) {
        if self.pos > self.buf.len() {
            self.buf.resize(self.pos, 0);
        }
        let overlap = (self.buf.len() - self.pos).min(data.len());
        self.buf[self.pos..self.pos + overlap].copy_from_slice(&data[..overlap]);
        self.buf.extend_from_slice(&data[overlap..]);
        self.pos += data.len();
    }

    /// Write a string followed by a null terminator.
    pub fn write_cstring(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_u8(0);
    }

    /// Write a string prefixed by its one-byte length (truncated to 255 bytes).
    pub fn write_pascal_string(&mut self, s: &str) {
        let raw = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
        self.write_u8(raw.len() as u8);
        self.write_bytes(raw);
    }

    /// Patch an already written 32-bit field without moving the position.
    pub fn adjust_u32_at(&mut self, position: usize, value: u32) -> Result<()> {
        self.patch_at(position, &value.to_be_bytes())
    }

    /// Patch an already written 64-bit field without moving the position.
    pub fn adjust_u64_at(&mut self, position: usize, value: u64) -> Result<()> {
        self.patch_at(position, &value.to_be_bytes())
    }

    fn patch_at(&mut self, position: usize, raw: &[u8]) -> Result<()> {
        let end = position
            .checked_add(raw.len())
            .filter(|end| *end <= self.buf.len())
            .ok_or(Error::BufferUnderflow {
                position,
                need: raw.len(),
                have: self.buf.len().saturating_sub(position),
            })?;
        self.buf[position..end].copy_from_slice(raw);
        Ok(())
    }
}
