//! Small textual encoding helpers used by configuration parsing.
//!
//! The wire-framing layer never touches these; they exist so a
//! [`crate::config::Config`] can accept a hex-encoded network magic or log a
//! checksum/peer-id in a human-readable form without pulling in a
//! full encoding crate for a handful of call sites.

use crate::error::DecodeError;

/// Decodes a hex string (with or without a leading `0x`) into bytes.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, DecodeError> {
    let s = input.strip_prefix("0x").unwrap_or(input);
    if s.len() % 2 != 0 {
        return Err(DecodeError::InputTooShort { expected: s.len() + 1, actual: s.len() });
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for (i, pair) in bytes.chunks(2).enumerate() {
        let hi = hex_digit(pair[0], i * 2)?;
        let lo = hex_digit(pair[1], i * 2 + 1)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_digit(b: u8, offset: usize) -> Result<u8, DecodeError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(DecodeError::InvalidHexDigit { digit: b as char, offset }),
    }
}

/// Decodes a hex string into a fixed 4-byte network magic value (little-endian on the wire).
pub fn decode_magic_hex(input: &str) -> Result<u32, DecodeError> {
    let bytes = decode_hex(input)?;
    if bytes.len() != 4 {
        return Err(DecodeError::InputTooShort { expected: 4, actual: bytes.len() });
    }
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Encodes bytes as lowercase hex, for log lines and error messages.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let bytes = decode_hex("0xDEADBEEF").unwrap();
        assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(encode_hex(&bytes), "deadbeef");
    }

    #[test]
    fn rejects_odd_length() {
        assert!(decode_hex("abc").is_err());
    }

    #[test]
    fn rejects_bad_digit() {
        let err = decode_hex("zz").unwrap_err();
        assert_eq!(err, DecodeError::InvalidHexDigit { digit: 'z', offset: 0 });
    }

    #[test]
    fn magic_round_trips() {
        let magic = decode_magic_hex("0xDAB5BFFA").unwrap();
        assert_eq!(magic, 0xDAB5BFFA);
    }
}
