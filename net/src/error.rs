//! Error taxonomy for the networking core.
//!
//! The core never unwinds for control flow: every fallible operation
//! returns a [`Result`] carrying one of the variants below. Programming
//! errors (violated invariants) abort via `assert!`/`panic!` instead of
//! being encoded here.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error, grouping the taxonomy into its named categories.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("idle: {0}")]
    Idle(IdleReason),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("tls: {0}")]
    Tls(String),
}

impl Error {
    /// Errors that are recoverable on a framing boundary: wait for more bytes.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Framing(FramingError::HeaderIncomplete | FramingError::BodyIncomplete)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(IoError::from(value))
    }
}

/// Errors decoding externally-supplied textual/binary encodings (hex, base58,
/// base64, amount ranges). The wire-framing layer does not produce these;
/// they surface from the small encoding helpers in [`crate::encoding`] used
/// by configuration parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("input too short: expected at least {expected} bytes, got {actual}")]
    InputTooShort { expected: usize, actual: usize },
    #[error("invalid hex digit {digit:?} at offset {offset}")]
    InvalidHexDigit { digit: char, offset: usize },
    #[error("invalid base58 input")]
    InvalidBase58,
    #[error("invalid base64 input")]
    InvalidBase64,
    #[error("amount out of range")]
    InvalidAmountRange,
}

/// Errors from [`crate::wire::bytestream::ByteStream`] primitives.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum SerializationError {
    #[error("attempted to write {0} bytes, which exceeds the absolute input limit")]
    InputTooLarge(usize),
    #[error("read of {requested} bytes overflows {available} available")]
    ReadOverflow { requested: usize, available: usize },
    #[error("compact size was encoded using more bytes than the minimal canonical form")]
    NonCanonicalCompactSize,
    #[error("compact size {0} exceeds the absolute ceiling")]
    CompactSizeTooBig(u64),
    #[error("unexpected serialization state")]
    Unexpected,
}

/// Errors from message-framing validation (header and full-message).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum FramingError {
    #[error("header incomplete")]
    HeaderIncomplete,
    #[error("body incomplete")]
    BodyIncomplete,
    #[error("magic mismatch: expected {expected:#010x}, got {actual:#010x}")]
    MagicMismatch { expected: u32, actual: u32 },
    #[error("unknown command {0:?}")]
    UnknownCommand([u8; 12]),
    #[error("malformed command (non-ASCII byte or stray non-NUL padding)")]
    MalformedCommand,
    #[error("empty command")]
    EmptyCommand,
    #[error("payload of {actual} bytes is smaller than the minimum {min} for this command")]
    UndersizedPayload { actual: usize, min: usize },
    #[error("payload of {actual} bytes exceeds the maximum {max} for this command")]
    OversizedPayload { actual: usize, max: usize },
    #[error("stream holds {actual} bytes, header declares {expected}")]
    MismatchingPayloadLength { expected: usize, actual: usize },
    #[error("payload checksum does not match header")]
    InvalidChecksum,
    #[error("vectorized payload declares zero elements")]
    EmptyVector,
    #[error("vector of {actual} elements exceeds the maximum of {max}")]
    OversizedVector { actual: u64, max: u64 },
    #[error("vector payload size does not match element count * element size")]
    MismatchesVectorSize,
    #[error("vector contains duplicate elements")]
    DuplicateVectorItems,
    #[error("command is not supported for protocol version {version} (requires >= {min_version})")]
    UnsupportedForProtocolVersion { version: i32, min_version: i32 },
    #[error("command is deprecated for protocol version {version} (requires <= {max_version})")]
    DeprecatedForProtocolVersion { version: i32, max_version: i32 },
}

/// Errors from the peer handshake/keep-alive state machine.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    #[error("handshake flag already set")]
    DuplicateHandshake,
    #[error("message received before handshake completed")]
    InvalidHandshake,
    #[error("remote protocol version {0} is unsupported")]
    InvalidProtocolVersion(i32),
    #[error("pong nonce does not match the outstanding ping")]
    MismatchingPingPongNonce,
    #[error("too many messages processed in a single read")]
    MessagesFlooding,
    #[error("invalid message state: {reason}")]
    InvalidMessageState { reason: String },
}

impl ProtocolError {
    pub fn self_connect() -> Self {
        ProtocolError::InvalidMessageState { reason: "connected to self".to_string() }
    }

    pub fn unexpected_pong_no_outstanding_ping() -> Self {
        ProtocolError::InvalidMessageState { reason: "pong received with no outstanding ping".to_string() }
    }
}

/// Reasons a peer is disconnected by the idle-detection pass (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    PingTimeout,
    ProtocolHandshakeTimeout,
    InboundTimeout,
    OutboundTimeout,
    GlobalTimeout,
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdleReason::PingTimeout => "ping-timeout",
            IdleReason::ProtocolHandshakeTimeout => "protocol-handshake-timeout",
            IdleReason::InboundTimeout => "inbound-timeout",
            IdleReason::OutboundTimeout => "outbound-timeout",
            IdleReason::GlobalTimeout => "global-timeout",
        };
        f.write_str(s)
    }
}

/// I/O-layer failures. `TransportClosed`/`TransportError` are fatal to the
/// peer that produced them; `TlsHandshakeFailed` is fatal during bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("remote end closed the transport")]
    TransportClosed,
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

impl From<std::io::Error> for IoError {
    fn from(value: std::io::Error) -> Self {
        IoError::TransportError(value.to_string())
    }
}
