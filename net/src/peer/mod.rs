//! Per-connection state machine (spec.md §3, §4.4): owns handshake
//! progress, keep-alive state, timing fields and per-kind counters. The
//! transport and the read/write loop driving this state live in
//! [`connection`]; this module is the synchronous state the single-consumer
//! per-peer task owns exclusively.

pub mod connection;
pub mod dispatch;
pub mod handshake;
pub mod idle;
pub mod keepalive;
pub mod payloads;
pub mod transport;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

pub use handshake::Direction;
pub use handshake::HandshakeState;
pub use keepalive::KeepAlive;

use crate::wire::catalog::MessageKind;

/// Locally-unique, monotonically-issued peer id (spec.md §3: "≥ 1").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

/// Issues [`PeerId`]s starting at 1, per the Hub's registry.
#[derive(Debug, Default)]
pub struct PeerIdGenerator(u64);

impl PeerIdGenerator {
    pub fn new() -> Self {
        PeerIdGenerator(0)
    }

    pub fn next(&mut self) -> PeerId {
        self.0 += 1;
        PeerId(self.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCounter {
    pub count: u64,
    pub bytes: u64,
}

impl MessageCounter {
    fn record(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

#[derive(Debug, Default)]
pub struct PeerCounters {
    inbound: HashMap<MessageKind, MessageCounter>,
    outbound: HashMap<MessageKind, MessageCounter>,
}

impl PeerCounters {
    pub fn record_inbound(&mut self, kind: MessageKind, bytes: u64) {
        self.inbound.entry(kind).or_default().record(bytes);
    }

    pub fn record_outbound(&mut self, kind: MessageKind, bytes: u64) {
        self.outbound.entry(kind).or_default().record(bytes);
    }

    pub fn inbound(&self, kind: MessageKind) -> MessageCounter {
        self.inbound.get(&kind).copied().unwrap_or_default()
    }

    pub fn outbound(&self, kind: MessageKind) -> MessageCounter {
        self.outbound.get(&kind).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLifecycle {
    Created,
    TlsHandshaking,
    ProtocolHandshaking,
    Running,
    Stopping,
    Stopped,
}

/// The synchronous peer state: no I/O, no async, safe to unit test in
/// isolation. Owned exclusively by the peer's single-consumer task
/// ([`connection::run_peer`]).
pub struct Peer {
    pub id: PeerId,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    pub lifecycle: PeerLifecycle,

    pub handshake: HandshakeState,
    pub keepalive: KeepAlive,

    pub connected_at: Instant,
    pub last_message_sent_at: Option<Instant>,
    pub last_message_received_at: Option<Instant>,
    pub inbound_msg_started_at: Option<Instant>,
    pub outbound_msg_started_at: Option<Instant>,

    /// `min(local_version, remote_version)`, set once the handshake
    /// completes.
    pub negotiated_version: i32,

    pub counters: PeerCounters,

    /// Whether an inbound `getaddr` has already been answered once
    /// (anti-fingerprinting: subsequent `getaddr` is silently ignored).
    pub seen_getaddr: bool,
}

impl Peer {
    pub fn new(id: u64, remote_addr: SocketAddr, direction: Direction, connected_at: Instant) -> Self {
        Peer {
            id: PeerId(id),
            remote_addr,
            direction,
            lifecycle: PeerLifecycle::Created,
            handshake: HandshakeState::new(),
            keepalive: KeepAlive::new(),
            connected_at,
            last_message_sent_at: None,
            last_message_received_at: None,
            inbound_msg_started_at: None,
            outbound_msg_started_at: None,
            negotiated_version: 0,
            counters: PeerCounters::default(),
            seen_getaddr: false,
        }
    }

    pub fn mark_inbound_message_started(&mut self, now: Instant) {
        self.inbound_msg_started_at = Some(now);
    }

    pub fn mark_inbound_message_finished(&mut self, now: Instant, kind: MessageKind, bytes: u64) {
        self.inbound_msg_started_at = None;
        self.last_message_received_at = Some(now);
        self.counters.record_inbound(kind, bytes);
    }

    pub fn mark_outbound_message_started(&mut self, now: Instant) {
        self.outbound_msg_started_at = Some(now);
    }

    /// Ping/pong do not stamp `last_message_sent_at` (spec.md §4.4).
    pub fn mark_outbound_message_finished(&mut self, now: Instant, kind: MessageKind, bytes: u64) {
        self.outbound_msg_started_at = None;
        if !matches!(kind, MessageKind::Ping | MessageKind::Pong) {
            self.last_message_sent_at = Some(now);
        }
        self.counters.record_outbound(kind, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ids_start_at_one_and_increment() {
        let mut generator = PeerIdGenerator::new();
        assert_eq!(generator.next(), PeerId(1));
        assert_eq!(generator.next(), PeerId(2));
    }

    #[test]
    fn ping_pong_does_not_stamp_last_sent() {
        let addr: SocketAddr = "127.0.0.1:18444".parse().unwrap();
        let now = Instant::now();
        let mut peer = Peer::new(1, addr, Direction::Outbound, now);
        peer.mark_outbound_message_finished(now, MessageKind::Ping, 0);
        assert_eq!(peer.last_message_sent_at, None);
        peer.mark_outbound_message_finished(now, MessageKind::Verack, 0);
        assert_eq!(peer.last_message_sent_at, Some(now));
    }
}
