//! Wire framing: byte-level primitives, the message catalog, header
//! validation, and the incremental message parser/serializer.

pub mod bytestream;
pub mod catalog;
pub mod header;
pub mod message;

pub use bytestream::{ByteStream, Scope};
pub use catalog::{MessageDefinition, MessageKind};
pub use header::MessageHeader;
pub use message::{HeaderFieldsHandle, Message, ParseOutcome};
