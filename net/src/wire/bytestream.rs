//! `ByteStream`: an append-only byte buffer with an independent read cursor.
//!
//! Generalizes the teacher's `ByteBufferParser`/`ByteBufferComposer`/`IOBuffer`
//! trio into a single type that owns its storage, tracks a read cursor
//! separately from the write position, and knows the wire protocol version
//! and scope it was created for (network framing vs. on-disk storage vs.
//! hashing input) so callers downstream can gate version-sensitive decoding.

use crate::error::{Result, SerializationError};

/// The absolute ceiling a compact-size integer may decode to (spec.md §4.1).
pub const COMPACT_SIZE_CEILING: u64 = 0x0200_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Network,
    Storage,
    Hash,
}

/// An append-only byte buffer with an independent read cursor.
#[derive(Debug, Clone)]
pub struct ByteStream {
    buffer: Vec<u8>,
    read_pos: usize,
    version: i32,
    scope: Scope,
}

impl Default for ByteStream {
    fn default() -> Self {
        Self::new(0, Scope::Network)
    }
}

impl ByteStream {
    pub fn new(version: i32, scope: Scope) -> Self {
        ByteStream { buffer: Vec::new(), read_pos: 0, version, scope }
    }

    pub fn with_capacity(capacity: usize, version: i32, scope: Scope) -> Self {
        ByteStream { buffer: Vec::with_capacity(capacity), read_pos: 0, version, scope }
    }

    pub fn from_vec(buffer: Vec<u8>, version: i32, scope: Scope) -> Self {
        ByteStream { buffer, read_pos: 0, version, scope }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = version;
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Total bytes currently held (size, not capacity).
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes available to read from the current cursor position.
    pub fn avail(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    pub fn eof(&self) -> bool {
        self.avail() == 0
    }

    pub fn tell_read(&self) -> usize {
        self.read_pos
    }

    pub fn seek_read(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.len() {
            return Err(SerializationError::ReadOverflow { requested: pos, available: self.buffer.len() }.into());
        }
        self.read_pos = pos;
        Ok(())
    }

    /// Advances the read cursor by `n`, clamped to `size()`.
    pub fn skip(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n).min(self.buffer.len());
    }

    /// Drops everything before the read cursor and resets the cursor to 0.
    pub fn shrink(&mut self) {
        self.buffer.drain(..self.read_pos);
        self.read_pos = 0;
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }

    /// A view over the whole underlying buffer, regardless of read cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// A view over the unread remainder of the buffer.
    pub fn unread_slice(&self) -> &[u8] {
        &self.buffer[self.read_pos..]
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn push_back(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    /// Overwrites `len` bytes at absolute offset `at`. Used to patch the
    /// payload-length and checksum fields of a header after serializing the
    /// payload that follows it.
    pub fn patch(&mut self, at: usize, bytes: &[u8]) {
        self.buffer[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Reads `n` bytes and advances the cursor, or fails if fewer than `n`
    /// bytes are available.
    pub fn read(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.avail() {
            return Err(SerializationError::ReadOverflow { requested: n, available: self.avail() }.into());
        }
        let start = self.read_pos;
        self.read_pos += n;
        Ok(&self.buffer[start..self.read_pos])
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32_le()?))
    }

    pub fn read_f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64_le()?))
    }

    pub fn write_u8(&mut self, v: u8) {
        self.push_back(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i16_le(&mut self, v: i16) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i32_le(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64_le(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.write(&v.to_be_bytes());
    }

    pub fn write_f32_le(&mut self, v: f32) {
        self.write_u32_le(v.to_bits());
    }

    pub fn write_f64_le(&mut self, v: f64) {
        self.write_u64_le(v.to_bits());
    }

    /// Writes `v` using the canonical minimal compact-size encoding (spec.md §4.1).
    pub fn write_compact_size(&mut self, v: u64) {
        match v {
            0..=0xFC => self.write_u8(v as u8),
            0xFD..=0xFFFF => {
                self.write_u8(0xFD);
                self.write_u16_le(v as u16);
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.write_u8(0xFE);
                self.write_u32_le(v as u32);
            }
            _ => {
                self.write_u8(0xFF);
                self.write_u64_le(v);
            }
        }
    }

    /// Reads a compact-size integer, rejecting non-minimal encodings and
    /// values above [`COMPACT_SIZE_CEILING`].
    pub fn read_compact_size(&mut self) -> Result<u64> {
        let prefix = self.read_u8()?;
        let value = match prefix {
            0..=0xFC => prefix as u64,
            0xFD => {
                let v = self.read_u16_le()? as u64;
                if v <= 0xFC {
                    return Err(SerializationError::NonCanonicalCompactSize.into());
                }
                v
            }
            0xFE => {
                let v = self.read_u32_le()? as u64;
                if v <= 0xFFFF {
                    return Err(SerializationError::NonCanonicalCompactSize.into());
                }
                v
            }
            0xFF => {
                let v = self.read_u64_le()?;
                if v <= 0xFFFF_FFFF {
                    return Err(SerializationError::NonCanonicalCompactSize.into());
                }
                v
            }
        };
        if value > COMPACT_SIZE_CEILING {
            return Err(SerializationError::CompactSizeTooBig(value).into());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn read_respects_avail() {
        let mut s = ByteStream::new(0, Scope::Network);
        s.write(&[1, 2, 3]);
        assert_eq!(s.avail(), 3);
        assert!(s.read(4).is_err());
        assert_eq!(s.read(2).unwrap(), &[1, 2]);
        assert_eq!(s.tell_read(), 2);
        assert_eq!(s.avail(), 1);
    }

    #[test]
    fn shrink_drops_consumed_prefix() {
        let mut s = ByteStream::new(0, Scope::Network);
        s.write(&[1, 2, 3, 4]);
        s.read(2).unwrap();
        s.shrink();
        assert_eq!(s.tell_read(), 0);
        assert_eq!(s.as_slice(), &[3, 4]);
    }

    #[rstest]
    #[case(0u64, 1usize)]
    #[case(252, 1)]
    #[case(253, 3)]
    #[case(0xFFFF, 3)]
    #[case(0x1_0000, 5)]
    #[case(0xFFFF_FFFF, 5)]
    #[case(0x1_0000_0000, 9)]
    fn compact_size_widths(#[case] value: u64, #[case] expected_len: usize) {
        let mut s = ByteStream::new(0, Scope::Network);
        s.write_compact_size(value);
        assert_eq!(s.size(), expected_len);
        assert_eq!(s.read_compact_size().unwrap(), value);
    }

    #[test]
    fn rejects_non_minimal_encoding() {
        // 0xFD followed by 0x00FC (252) could fit in one byte.
        let mut s = ByteStream::new(0, Scope::Network);
        s.write(&[0xfd, 0xfc, 0x00]);
        assert_eq!(s.read_compact_size().unwrap_err().to_string(), SerializationError::NonCanonicalCompactSize.to_string());
    }

    #[test]
    fn rejects_oversized_compact_value() {
        let mut s = ByteStream::new(0, Scope::Network);
        s.write_u8(0xFF);
        s.write_u64_le(COMPACT_SIZE_CEILING + 1);
        assert!(s.read_compact_size().is_err());
    }

    #[test]
    fn integer_round_trips_are_little_endian() {
        let mut s = ByteStream::new(0, Scope::Network);
        s.write_u32_le(0x0102_0304);
        assert_eq!(s.as_slice(), &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(s.read_u32_le().unwrap(), 0x0102_0304);
    }

    proptest! {
        // spec.md §8: decode_compact(encode_compact(v)) == v for every
        // representable value, and nothing but the value itself is left
        // behind in the buffer.
        #[test]
        fn compact_size_round_trips_for_every_representable_value(v in 0..=COMPACT_SIZE_CEILING) {
            let mut s = ByteStream::new(0, Scope::Network);
            s.write_compact_size(v);
            prop_assert_eq!(s.read_compact_size().unwrap(), v);
            prop_assert_eq!(s.avail(), 0);
        }

        // spec.md §8: values above the ceiling always fail to decode, never
        // silently truncate or wrap.
        #[test]
        fn compact_size_above_ceiling_is_always_rejected(v in (COMPACT_SIZE_CEILING + 1)..=u64::MAX) {
            let mut s = ByteStream::new(0, Scope::Network);
            s.write_u8(0xFF);
            s.write_u64_le(v);
            prop_assert!(s.read_compact_size().is_err());
        }
    }
}
