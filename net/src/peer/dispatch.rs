//! Inbound per-kind dispatch (spec.md §4.4).

use std::net::SocketAddr;
use std::time::Instant;

use tracing::debug;

use crate::error::{Error, ProtocolError, Result};
use crate::peer::payloads::{decode_nonce, VersionPayload};
use crate::peer::{Direction, Peer};
use crate::wire::{Message, MessageKind};

/// What the peer's connection loop should do after dispatching one inbound
/// message.
pub enum DispatchAction {
    /// Nothing further to send.
    None,
    /// Enqueue these outbound replies, in order. `version` handshakes may
    /// need to answer with both a `version` (if we haven't sent ours yet)
    /// and a `verack`.
    Reply(Vec<(MessageKind, Vec<u8>)>),
    /// Hand the message to the injected application handler.
    Forward(Message),
    /// This peer must disconnect (e.g. seed-outbound done harvesting
    /// addresses, or a protocol violation).
    Disconnect(DisconnectReason),
}

pub enum DisconnectReason {
    SelfConnect,
    SeedOutboundDone,
    Protocol(ProtocolError),
}

/// Local connection configuration dispatch needs: our own nonce (for
/// self-connect detection), the protocol version bounds we accept, and the
/// fields needed to build our own outbound `version` payload when an
/// inbound peer's `version` arrives before we've sent ours.
pub struct DispatchContext {
    pub local_nonce: u64,
    pub local_protocol_version: i32,
    pub local_services: u64,
    pub user_agent: String,
    /// The address we advertise as our own (spec.md §9, NAT policy already
    /// resolved by the Hub at startup).
    pub advertised_addr: SocketAddr,
    /// Checkpointed chain tip height, injected by the application (spec.md §1).
    pub chain_tip_height: i32,
    pub min_supported_protocol_version: i32,
    pub max_supported_protocol_version: i32,
}

impl DispatchContext {
    fn own_version_payload(&self, remote_addr: SocketAddr) -> VersionPayload {
        VersionPayload::now(
            self.local_protocol_version,
            self.local_services,
            remote_addr,
            self.advertised_addr,
            self.local_nonce,
            self.user_agent.clone(),
            self.chain_tip_height,
        )
    }
}

pub fn dispatch_inbound(peer: &mut Peer, message: Message, now: Instant, ctx: &DispatchContext) -> Result<DispatchAction> {
    match message.kind {
        MessageKind::Version => on_version(peer, &message, ctx),
        MessageKind::Verack => on_verack(peer),
        MessageKind::Ping => on_ping(peer, &message),
        MessageKind::Pong => on_pong(peer, &message, now),
        MessageKind::GetAddr => on_getaddr(peer),
        _ => {
            peer.handshake.require_completed()?;
            Ok(DispatchAction::Forward(message))
        }
    }
}

fn on_version(peer: &mut Peer, message: &Message, ctx: &DispatchContext) -> Result<DispatchAction> {
    let version = VersionPayload::decode(&message.payload)?;

    if version.protocol_version < ctx.min_supported_protocol_version
        || version.protocol_version > ctx.max_supported_protocol_version
    {
        return Err(Error::from(ProtocolError::InvalidProtocolVersion(version.protocol_version)));
    }

    if version.nonce == ctx.local_nonce {
        return Ok(DispatchAction::Disconnect(DisconnectReason::SelfConnect));
    }

    peer.handshake.on_remote_version_received()?;
    peer.negotiated_version = version.protocol_version.min(ctx.max_supported_protocol_version);

    debug!(peer = peer.id.0, remote_version = version.protocol_version, "received version");

    // Inbound peers haven't sent their own version yet at this point
    // (spec.md §3: "inbound peers MUST wait for version"); answer with our
    // version first, then verack. Outbound peers already sent theirs at
    // connect time, so only verack is owed here.
    let mut replies = Vec::with_capacity(2);
    if !peer.handshake.local_version_sent() {
        let own_version = ctx.own_version_payload(peer.remote_addr);
        replies.push((MessageKind::Version, own_version.encode()));
    }
    replies.push((MessageKind::Verack, vec![]));
    Ok(DispatchAction::Reply(replies))
}

fn on_verack(peer: &mut Peer) -> Result<DispatchAction> {
    peer.handshake.on_local_verack_received()?;
    Ok(DispatchAction::None)
}

fn on_ping(peer: &mut Peer, message: &Message) -> Result<DispatchAction> {
    peer.handshake.require_completed()?;
    // Validate the payload shape, but the reply echoes the exact bytes.
    decode_nonce(&message.payload)?;
    Ok(DispatchAction::Reply(vec![(MessageKind::Pong, message.payload.clone())]))
}

fn on_pong(peer: &mut Peer, message: &Message, now: Instant) -> Result<DispatchAction> {
    peer.handshake.require_completed()?;
    let nonce = decode_nonce(&message.payload)?;
    match peer.keepalive.on_pong(nonce, now) {
        Ok(_latency) => Ok(DispatchAction::None),
        Err(err) => Ok(DispatchAction::Disconnect(DisconnectReason::Protocol(err))),
    }
}

fn on_getaddr(peer: &mut Peer) -> Result<DispatchAction> {
    peer.handshake.require_completed()?;
    if peer.direction == Direction::SeedOutbound {
        return Ok(DispatchAction::Disconnect(DisconnectReason::SeedOutboundDone));
    }
    if peer.seen_getaddr {
        // Anti-fingerprinting: a repeated getaddr from an inbound peer is
        // ignored rather than answered or rejected.
        return Ok(DispatchAction::None);
    }
    peer.seen_getaddr = true;
    let forwarded = synthesize_message(MessageKind::GetAddr, vec![])?;
    Ok(DispatchAction::Forward(forwarded))
}

/// Builds a [`Message`] for a kind/payload the peer itself produced rather
/// than read off the wire (the forwarded `getaddr` notification), reusing
/// the wire layer's own header construction instead of duplicating it.
fn synthesize_message(kind: MessageKind, payload: Vec<u8>) -> Result<Message> {
    use crate::wire::{ParseOutcome, ByteStream as Stream, Scope};
    let stream = crate::wire::Message::push(kind, &payload, 0, 0)?;
    let mut reparse = Stream::from_vec(stream.as_slice().to_vec(), 0, Scope::Network);
    let mut mode = None;
    match crate::wire::Message::try_parse(&mut reparse, &mut mode, 0, 0)? {
        ParseOutcome::Ready(message) => Ok(message),
        ParseOutcome::NeedMoreBytes => unreachable!("push always produces a complete message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer() -> Peer {
        let addr: SocketAddr = "127.0.0.1:18444".parse().unwrap();
        Peer::new(1, addr, Direction::Outbound, Instant::now())
    }

    fn ctx() -> DispatchContext {
        DispatchContext {
            local_nonce: 1,
            local_protocol_version: 170_002,
            local_services: 0,
            user_agent: "/net:0.1/".to_string(),
            advertised_addr: "203.0.113.1:18444".parse().unwrap(),
            chain_tip_height: 0,
            min_supported_protocol_version: 170_002,
            max_supported_protocol_version: 170_002,
        }
    }

    #[test]
    fn version_with_matching_nonce_is_self_connect() {
        let mut p = peer();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let payload = VersionPayload::now(170_002, 0, addr, addr, 1, "x".to_string(), 0);
        let message = synthesize_message(MessageKind::Version, payload.encode()).unwrap();
        let action = dispatch_inbound(&mut p, message, Instant::now(), &ctx()).unwrap();
        assert!(matches!(action, DispatchAction::Disconnect(DisconnectReason::SelfConnect)));
    }

    #[test]
    fn outbound_version_reply_omits_own_version_already_sent() {
        let mut p = peer();
        p.handshake.on_local_version_sent().unwrap();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let payload = VersionPayload::now(170_002, 0, addr, addr, 2, "x".to_string(), 0);
        let message = synthesize_message(MessageKind::Version, payload.encode()).unwrap();
        let action = dispatch_inbound(&mut p, message, Instant::now(), &ctx()).unwrap();
        match action {
            DispatchAction::Reply(replies) => {
                assert_eq!(replies.len(), 1);
                assert_eq!(replies[0].0, MessageKind::Verack);
            }
            _ => panic!("expected a reply"),
        }
        assert!(p.handshake.require_completed().is_err());
    }

    #[test]
    fn inbound_version_reply_sends_own_version_then_verack() {
        let mut p = peer();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let payload = VersionPayload::now(170_002, 0, addr, addr, 2, "x".to_string(), 0);
        let message = synthesize_message(MessageKind::Version, payload.encode()).unwrap();
        let action = dispatch_inbound(&mut p, message, Instant::now(), &ctx()).unwrap();
        match action {
            DispatchAction::Reply(replies) => {
                assert_eq!(replies.len(), 2);
                assert_eq!(replies[0].0, MessageKind::Version);
                assert_eq!(replies[1].0, MessageKind::Verack);
            }
            _ => panic!("expected a reply"),
        }
    }
}
