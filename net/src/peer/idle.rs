//! Idle-detection pass, evaluated once per Hub service tick (spec.md §4.4).

use std::time::{Duration, Instant};

use crate::config::TimeoutsConfig;
use crate::error::IdleReason;
use crate::peer::Peer;

/// Returns the first applicable idle reason, in the order spec.md §4.4
/// lists them, or `None` if the peer is healthy.
pub fn evaluate_idle(peer: &Peer, now: Instant, timeouts: &TimeoutsConfig) -> Option<IdleReason> {
    if let Some(sent_at) = peer.keepalive.outstanding_ping_since() {
        if now.saturating_duration_since(sent_at) > Duration::from_millis(timeouts.ping_timeout_milliseconds) {
            return Some(IdleReason::PingTimeout);
        }
    }

    if !peer.handshake.completed()
        && now.saturating_duration_since(peer.connected_at)
            > Duration::from_secs(timeouts.protocol_handshake_timeout_seconds)
    {
        return Some(IdleReason::ProtocolHandshakeTimeout);
    }

    if let Some(started_at) = peer.inbound_msg_started_at {
        if now.saturating_duration_since(started_at) > Duration::from_secs(timeouts.inbound_timeout_seconds) {
            return Some(IdleReason::InboundTimeout);
        }
    }

    if let Some(started_at) = peer.outbound_msg_started_at {
        if now.saturating_duration_since(started_at) > Duration::from_secs(timeouts.outbound_timeout_seconds) {
            return Some(IdleReason::OutboundTimeout);
        }
    }

    let last_activity = match (peer.last_message_sent_at, peer.last_message_received_at) {
        (Some(sent), Some(received)) => sent.max(received),
        (Some(sent), None) => sent,
        (None, Some(received)) => received,
        (None, None) => peer.connected_at,
    };
    if now.saturating_duration_since(last_activity) >= Duration::from_secs(timeouts.idle_timeout_seconds) {
        return Some(IdleReason::GlobalTimeout);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Direction, Peer};
    use std::net::SocketAddr;

    fn peer_at(now: Instant) -> Peer {
        let addr: SocketAddr = "127.0.0.1:18444".parse().unwrap();
        Peer::new(1, addr, Direction::Outbound, now)
    }

    fn timeouts() -> TimeoutsConfig {
        TimeoutsConfig {
            ping_interval_seconds: 120,
            ping_timeout_milliseconds: 1_000,
            protocol_handshake_timeout_seconds: 5,
            inbound_timeout_seconds: 5,
            outbound_timeout_seconds: 5,
            idle_timeout_seconds: 10,
        }
    }

    #[test]
    fn fresh_peer_is_not_idle() {
        let now = Instant::now();
        let peer = peer_at(now);
        assert_eq!(evaluate_idle(&peer, now, &timeouts()), None);
    }

    #[test]
    fn handshake_timeout_fires_when_not_completed() {
        let now = Instant::now();
        let peer = peer_at(now);
        let later = now + Duration::from_secs(6);
        assert_eq!(evaluate_idle(&peer, later, &timeouts()), Some(IdleReason::ProtocolHandshakeTimeout));
    }

    #[test]
    fn global_timeout_fires_after_idle_timeout_seconds() {
        let now = Instant::now();
        let mut peer = peer_at(now);
        peer.handshake.on_local_version_sent().unwrap();
        peer.handshake.on_remote_version_received().unwrap();
        peer.handshake.on_remote_verack_sent().unwrap();
        peer.handshake.on_local_verack_received().unwrap();
        peer.last_message_received_at = Some(now);

        let later = now + Duration::from_secs(11);
        assert_eq!(evaluate_idle(&peer, later, &timeouts()), Some(IdleReason::GlobalTimeout));
    }
}
