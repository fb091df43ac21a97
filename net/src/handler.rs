//! The injected application message handler: the core's only collaborator
//! for message kinds it doesn't resolve itself (spec.md §1, "out of scope").
//! `net` parses and classifies `inv`/`addr`/`getheaders`/`headers`/`mempool`/
//! `reject` but never maintains an address book or block index; it hands the
//! fully-validated [`Message`] off to whatever implements this trait.

use crate::peer::PeerId;
use crate::wire::Message;

/// Implemented by the component that owns chain/address-book state. Methods
/// take `&self` because the core dispatches from a per-peer task — the
/// handler is expected to be internally synchronized (e.g. behind channels
/// to its own task) rather than mutated in place here.
pub trait ApplicationHandler: Send + Sync {
    /// A non-handshake, non-keepalive message the peer's dispatch loop
    /// doesn't resolve on its own.
    fn on_message(&self, peer: PeerId, message: Message);

    /// The peer disconnected; `reason` is `None` for an orderly local stop.
    fn on_peer_disconnected(&self, peer: PeerId, reason: Option<String>);
}

/// An [`ApplicationHandler`] that drops everything, for tests and for
/// standalone handshake-only deployments of the core.
pub struct NullHandler;

impl ApplicationHandler for NullHandler {
    fn on_message(&self, _peer: PeerId, _message: Message) {}
    fn on_peer_disconnected(&self, _peer: PeerId, _reason: Option<String>) {}
}
