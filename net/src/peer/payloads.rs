//! Serializers/deserializers for the message kinds the Peer state machine
//! resolves itself: `version`, `ping`, `pong`. Everything else is opaque
//! payload bytes forwarded to the [`crate::handler::ApplicationHandler`].
//!
//! Grounded in the teacher's `VersionMessage`/`NodeDesc` (`wire_protocol/
//! messages.rs`, `wire_protocol/node.rs`), generalized to the full 26-byte
//! `addr_recv`/`addr_from` net-address encoding and a real variable-length
//! user-agent string instead of the teacher's hardcoded placeholders.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, SerializationError};
use crate::wire::{ByteStream, Scope};

#[derive(Debug, Clone, PartialEq)]
pub struct VersionPayload {
    pub protocol_version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: SocketAddr,
    pub addr_from: SocketAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionPayload {
    pub fn now(
        protocol_version: i32,
        services: u64,
        addr_recv: SocketAddr,
        addr_from: SocketAddr,
        nonce: u64,
        user_agent: String,
        start_height: i32,
    ) -> Self {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs() as i64;
        VersionPayload { protocol_version, services, timestamp, addr_recv, addr_from, nonce, user_agent, start_height, relay: true }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut stream = ByteStream::new(self.protocol_version, Scope::Network);
        stream.write_i32_le(self.protocol_version);
        stream.write_u64_le(self.services);
        stream.write_i64_le(self.timestamp);
        write_net_addr(&mut stream, self.services, &self.addr_recv);
        write_net_addr(&mut stream, self.services, &self.addr_from);
        stream.write_u64_le(self.nonce);
        write_var_string(&mut stream, &self.user_agent);
        stream.write_i32_le(self.start_height);
        stream.write_bool(self.relay);
        stream.as_slice().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut stream = ByteStream::from_vec(payload.to_vec(), 0, Scope::Network);
        let protocol_version = stream.read_i32_le()?;
        let services = stream.read_u64_le()?;
        let timestamp = stream.read_i64_le()?;
        let addr_recv = read_net_addr(&mut stream)?;
        let addr_from = read_net_addr(&mut stream)?;
        let nonce = stream.read_u64_le()?;
        let user_agent = read_var_string(&mut stream)?;
        let start_height = stream.read_i32_le()?;
        let relay = if stream.avail() > 0 { stream.read_bool()? } else { true };
        Ok(VersionPayload { protocol_version, services, timestamp, addr_recv, addr_from, nonce, user_agent, start_height, relay })
    }
}

/// `8`-byte services + `16`-byte IPv6 (v4-mapped when applicable) + `2`-byte
/// big-endian port, with no leading timestamp — the `version` message's
/// embedded net address omits the time field that the standalone `addr`
/// message carries.
fn write_net_addr(stream: &mut ByteStream, services: u64, addr: &SocketAddr) {
    stream.write_u64_le(services);
    stream.write(&ipv6_bytes(addr.ip()));
    stream.write_u16_be(addr.port());
}

fn read_net_addr(stream: &mut ByteStream) -> Result<SocketAddr> {
    let _services = stream.read_u64_le()?;
    let ip_bytes: [u8; 16] = stream.read_array()?;
    let port = stream.read_u16_be()?;
    Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip_bytes)), port))
}

fn ipv6_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn write_var_string(stream: &mut ByteStream, s: &str) {
    stream.write_compact_size(s.len() as u64);
    stream.write(s.as_bytes());
}

fn read_var_string(stream: &mut ByteStream) -> Result<String> {
    let len = stream.read_compact_size()? as usize;
    let bytes = stream.read(len)?.to_vec();
    String::from_utf8(bytes).map_err(|_| SerializationError::Unexpected.into())
}

/// Ping/pong carry an 8-byte nonce, little-endian (spec.md §3).
pub fn encode_nonce(nonce: u64) -> Vec<u8> {
    nonce.to_le_bytes().to_vec()
}

pub fn decode_nonce(payload: &[u8]) -> Result<u64> {
    let mut stream = ByteStream::from_vec(payload.to_vec(), 0, Scope::Network);
    stream.read_u64_le()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_payload_round_trips() {
        let addr_recv: SocketAddr = "203.0.113.4:18444".parse().unwrap();
        let addr_from: SocketAddr = "198.51.100.9:18444".parse().unwrap();
        let payload = VersionPayload::now(170_002, 1, addr_recv, addr_from, 0xDEAD_BEEF, "node:0.1".to_string(), 42);

        let encoded = payload.encode();
        let decoded = VersionPayload::decode(&encoded).unwrap();

        assert_eq!(decoded.protocol_version, 170_002);
        assert_eq!(decoded.nonce, 0xDEAD_BEEF);
        assert_eq!(decoded.user_agent, "node:0.1");
        assert_eq!(decoded.start_height, 42);
        assert_eq!(decoded.addr_recv.port(), addr_recv.port());
    }

    #[test]
    fn nonce_round_trips() {
        let encoded = encode_nonce(0x1122_3344_5566_7788);
        assert_eq!(decode_nonce(&encoded).unwrap(), 0x1122_3344_5566_7788);
    }
}
