//! Incremental message parsing and serialization over a [`ByteStream`].

use crate::crypto::checksum4;
use crate::error::{Error, FramingError, Result};
use crate::wire::bytestream::{ByteStream, Scope};
use crate::wire::catalog::MessageKind;
use crate::wire::header::{MessageHeader, HEADER_LEN};

const PAYLOAD_LENGTH_OFFSET: usize = 16;
const CHECKSUM_OFFSET: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderFields {
    magic: u32,
    command: [u8; 12],
    payload_length: u32,
    checksum: [u8; 4],
}

/// Outcome of feeding more bytes into [`Message::try_parse`].
#[derive(Debug)]
pub enum ParseOutcome {
    /// Not enough bytes yet; the caller should read more from the transport.
    NeedMoreBytes,
    /// A full, validated message is ready.
    Ready(Message),
}

/// A fully-parsed, validated wire message: kind plus raw payload bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl Message {
    /// Attempts to parse one message out of `stream`, consuming bytes from
    /// the read cursor only when a full message is available. On
    /// `NeedMoreBytes` the cursor is left at its original position so the
    /// caller can append more bytes and retry.
    pub fn try_parse(
        stream: &mut ByteStream,
        mode: &mut Option<HeaderFieldsHandle>,
        expected_magic: u32,
        wire_version: i32,
    ) -> Result<ParseOutcome> {
        let start = stream.tell_read();

        let header_fields = match mode.take() {
            Some(handle) => handle.0,
            None => {
                if stream.avail() < HEADER_LEN {
                    stream.seek_read(start)?;
                    return Ok(ParseOutcome::NeedMoreBytes);
                }
                let magic = stream.read_u32_le()?;
                let command = stream.read_array::<12>()?;
                let payload_length = stream.read_u32_le()?;
                let checksum = stream.read_array::<4>()?;
                HeaderFields { magic, command, payload_length, checksum }
            }
        };
        // Cursor now sits right after the header, whether it was just read
        // or restored from a cached handle; body-incomplete rewinds here,
        // never past it, or a resumed parse would re-read header bytes.
        let post_header = stream.tell_read();

        if stream.avail() < header_fields.payload_length as usize {
            *mode = Some(HeaderFieldsHandle(header_fields));
            stream.seek_read(post_header)?;
            return Ok(ParseOutcome::NeedMoreBytes);
        }

        let header = MessageHeader::validate(
            header_fields.magic,
            header_fields.command,
            header_fields.payload_length,
            header_fields.checksum,
            expected_magic,
            wire_version,
        )?;

        let payload = stream.read(header.payload_length as usize)?.to_vec();
        let actual_checksum = checksum4(&payload);
        if actual_checksum != header.checksum {
            return Err(Error::from(FramingError::InvalidChecksum));
        }

        validate_vectorized_payload(&header, &payload)?;

        Ok(ParseOutcome::Ready(Message { kind: header.kind, header, payload }))
    }

    /// Like [`Message::try_parse`], but requires `stream` to hold exactly one
    /// message and nothing past it. Used to self-verify a freshly-serialized
    /// buffer, where the streaming (possibly-pipelined) semantics of
    /// `try_parse` don't apply.
    fn validate_exact(stream: &mut ByteStream, expected_magic: u32, wire_version: i32) -> Result<Message> {
        let total = stream.size();
        let mut mode = None;
        match Message::try_parse(stream, &mut mode, expected_magic, wire_version)? {
            ParseOutcome::Ready(message) => {
                if stream.avail() != 0 {
                    return Err(Error::from(FramingError::MismatchingPayloadLength {
                        expected: total - stream.avail(),
                        actual: total,
                    }));
                }
                Ok(message)
            }
            ParseOutcome::NeedMoreBytes => Err(Error::from(FramingError::BodyIncomplete)),
        }
    }

    /// Serializes `kind`'s header followed by `payload` into a fresh
    /// [`ByteStream`], patching the payload-length and checksum fields after
    /// the payload is known, then re-validating the result end to end.
    pub fn push(kind: MessageKind, payload: &[u8], magic: u32, wire_version: i32) -> Result<ByteStream> {
        let mut stream = ByteStream::with_capacity(HEADER_LEN + payload.len(), wire_version, Scope::Network);

        stream.write_u32_le(magic);
        stream.write(&kind.command_bytes());
        stream.write_u32_le(0); // placeholder, patched below
        stream.write(&[0u8; 4]); // placeholder, patched below
        stream.write(payload);

        let payload_length = (payload.len() as u32).to_le_bytes();
        stream.patch(PAYLOAD_LENGTH_OFFSET, &payload_length);

        let checksum = checksum4(payload);
        stream.patch(CHECKSUM_OFFSET, &checksum);

        let mut verify = ByteStream::from_vec(stream.as_slice().to_vec(), wire_version, Scope::Network);
        Message::validate_exact(&mut verify, magic, wire_version)?;
        Ok(stream)
    }
}

/// Opaque handle around the parsed header fields while a body is still
/// being collected across reads; kept outside [`Message`] so a caller can
/// stash it between `try_parse` calls without exposing field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFieldsHandle(HeaderFields);

/// Validates the vectorized-payload invariants (spec.md §4.3): a compact-size
/// count prefix, non-empty, within the per-kind item cap, and a total size
/// matching `count * item_size` when the kind has a fixed item size.
fn validate_vectorized_payload(header: &MessageHeader, payload: &[u8]) -> Result<()> {
    let def = header.kind.definition();
    if !def.is_vectorized {
        return Ok(());
    }

    let mut cursor = ByteStream::from_vec(payload.to_vec(), 0, Scope::Network);
    let count = cursor.read_compact_size()?;

    if count == 0 {
        return Err(Error::from(FramingError::EmptyVector));
    }
    if let Some(max_items) = def.max_vector_items {
        if count > max_items {
            return Err(Error::from(FramingError::OversizedVector { actual: count, max: max_items }));
        }
    }

    if let Some(item_size) = def.vector_item_size {
        let expected_remaining = count as usize * item_size;
        if cursor.avail() != expected_remaining {
            return Err(Error::from(FramingError::MismatchesVectorSize));
        }
        let mut seen: Vec<&[u8]> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let item = cursor.read(item_size)?;
            if seen.contains(&item) {
                return Err(Error::from(FramingError::DuplicateVectorItems));
            }
            seen.push(item);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAGIC: u32 = 0xDAB5_BFFA;
    const WIRE_VERSION: i32 = 170_002;

    #[test]
    fn verack_round_trips_through_push_and_parse() {
        let stream = Message::push(MessageKind::Verack, &[], MAGIC, WIRE_VERSION).unwrap();
        let mut reparse = ByteStream::from_vec(stream.as_slice().to_vec(), WIRE_VERSION, Scope::Network);
        let mut mode = None;
        match Message::try_parse(&mut reparse, &mut mode, MAGIC, WIRE_VERSION).unwrap() {
            ParseOutcome::Ready(message) => assert_eq!(message.kind, MessageKind::Verack),
            ParseOutcome::NeedMoreBytes => panic!("expected a ready message"),
        }
    }

    #[test]
    fn pong_patches_payload_length_and_checksum_after_body() {
        let stream = Message::push(MessageKind::Pong, &42u64.to_le_bytes(), MAGIC, WIRE_VERSION).unwrap();
        let bytes = stream.as_slice();
        assert_eq!(&bytes[PAYLOAD_LENGTH_OFFSET..PAYLOAD_LENGTH_OFFSET + 4], &8u32.to_le_bytes());
        assert_eq!(&bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4], &checksum4(&42u64.to_le_bytes()));
    }

    #[test]
    fn partial_header_requests_more_bytes() {
        let mut stream = ByteStream::new(WIRE_VERSION, Scope::Network);
        stream.write(&MAGIC.to_le_bytes());
        stream.write(&MessageKind::Verack.command_bytes());
        // payload_length/checksum not yet written
        let mut mode = None;
        match Message::try_parse(&mut stream, &mut mode, MAGIC, WIRE_VERSION).unwrap() {
            ParseOutcome::NeedMoreBytes => {}
            ParseOutcome::Ready(_) => panic!("expected NeedMoreBytes"),
        }
        assert_eq!(stream.tell_read(), 0);
    }

    #[test]
    fn partial_body_preserves_header_across_calls() {
        let full = Message::push(MessageKind::Pong, &7u64.to_le_bytes(), MAGIC, WIRE_VERSION).unwrap();
        let bytes = full.as_slice();

        let mut stream = ByteStream::new(WIRE_VERSION, Scope::Network);
        stream.write(&bytes[..HEADER_LEN + 4]);
        let mut mode = None;
        assert!(matches!(
            Message::try_parse(&mut stream, &mut mode, MAGIC, WIRE_VERSION).unwrap(),
            ParseOutcome::NeedMoreBytes
        ));
        assert!(mode.is_some());

        stream.write(&bytes[HEADER_LEN + 4..]);
        match Message::try_parse(&mut stream, &mut mode, MAGIC, WIRE_VERSION).unwrap() {
            ParseOutcome::Ready(message) => assert_eq!(message.payload, 7u64.to_le_bytes()),
            ParseOutcome::NeedMoreBytes => panic!("expected a ready message"),
        }
    }

    #[test]
    fn trailing_bytes_after_message_are_rejected_by_validate_exact() {
        let single = Message::push(MessageKind::Verack, &[], MAGIC, WIRE_VERSION).unwrap();
        let mut bytes = single.as_slice().to_vec();
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        let mut stream = ByteStream::from_vec(bytes, WIRE_VERSION, Scope::Network);
        let err = Message::validate_exact(&mut stream, MAGIC, WIRE_VERSION).unwrap_err();
        assert!(matches!(err, Error::Framing(FramingError::MismatchingPayloadLength { .. })));
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let mut stream = Message::push(MessageKind::Pong, &1u64.to_le_bytes(), MAGIC, WIRE_VERSION).unwrap();
        let last = stream.size() - 1;
        let mut bytes = stream.as_slice().to_vec();
        bytes[last] ^= 0xFF;
        stream = ByteStream::from_vec(bytes, WIRE_VERSION, Scope::Network);
        let mut mode = None;
        let err = Message::try_parse(&mut stream, &mut mode, MAGIC, WIRE_VERSION).unwrap_err();
        assert_eq!(err.to_string(), Error::from(FramingError::InvalidChecksum).to_string());
    }

    #[test]
    fn inv_with_duplicate_items_is_rejected() {
        let mut payload = ByteStream::new(0, Scope::Network);
        payload.write_compact_size(2);
        let item = [0xABu8; 36];
        payload.write(&item);
        payload.write(&item);
        let err = Message::push(MessageKind::Inv, payload.as_slice(), MAGIC, WIRE_VERSION).unwrap_err();
        assert_eq!(err.to_string(), Error::from(FramingError::DuplicateVectorItems).to_string());
    }

    #[test]
    fn inv_with_mismatched_vector_size_is_rejected() {
        let mut payload = ByteStream::new(0, Scope::Network);
        payload.write_compact_size(2);
        payload.write(&[0xAB; 36]);
        let err = Message::push(MessageKind::Inv, payload.as_slice(), MAGIC, WIRE_VERSION).unwrap_err();
        assert_eq!(err.to_string(), Error::from(FramingError::MismatchesVectorSize).to_string());
    }

    proptest! {
        // spec.md §8: parse(serialize(m)) == m for every well-formed message,
        // byte-exact including the checksum the header carries.
        #[test]
        fn pong_push_parse_round_trips_for_any_nonce(nonce in any::<u64>()) {
            let stream = Message::push(MessageKind::Pong, &nonce.to_le_bytes(), MAGIC, WIRE_VERSION).unwrap();
            let mut reparse = ByteStream::from_vec(stream.as_slice().to_vec(), WIRE_VERSION, Scope::Network);
            let mut mode = None;
            match Message::try_parse(&mut reparse, &mut mode, MAGIC, WIRE_VERSION).unwrap() {
                ParseOutcome::Ready(message) => prop_assert_eq!(message.payload, nonce.to_le_bytes().to_vec()),
                ParseOutcome::NeedMoreBytes => prop_assert!(false, "expected a ready message"),
            }
        }

        // A message split across two reads at any boundary inside the body
        // must parse identically to one delivered whole.
        #[test]
        fn pong_parses_identically_regardless_of_split_point(nonce in any::<u64>(), split in 0usize..HEADER_LEN + 8) {
            let full = Message::push(MessageKind::Pong, &nonce.to_le_bytes(), MAGIC, WIRE_VERSION).unwrap();
            let bytes = full.as_slice();

            let mut stream = ByteStream::new(WIRE_VERSION, Scope::Network);
            stream.write(&bytes[..split]);
            let mut mode = None;
            if split < bytes.len() {
                prop_assert!(matches!(
                    Message::try_parse(&mut stream, &mut mode, MAGIC, WIRE_VERSION).unwrap(),
                    ParseOutcome::NeedMoreBytes
                ));
            }
            stream.write(&bytes[split..]);
            match Message::try_parse(&mut stream, &mut mode, MAGIC, WIRE_VERSION).unwrap() {
                ParseOutcome::Ready(message) => prop_assert_eq!(message.payload, nonce.to_le_bytes().to_vec()),
                ParseOutcome::NeedMoreBytes => prop_assert!(false, "expected a ready message"),
            }
        }
    }
}
