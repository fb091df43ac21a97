//! The configuration bundle the core consumes (spec.md §6). `net` never
//! parses CLI args, env vars, or files itself; callers (the `node` binary)
//! build one of these from validated input and hand it to [`crate::hub::Hub`].

use std::net::SocketAddr;
use std::path::PathBuf;

/// Policy for the address advertised in outbound `version` payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatOption {
    None,
    Auto,
    ExplicitIp(std::net::IpAddr),
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Must match every inbound header's magic field exactly.
    pub magic: u32,
    /// Self-nonce embedded in outbound `version` payloads; used for
    /// self-connect detection.
    pub nonce: u64,
    pub default_port: u16,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub directory: PathBuf,
    pub key_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TimeoutsConfig {
    pub ping_interval_seconds: u64,
    pub ping_timeout_milliseconds: u64,
    pub protocol_handshake_timeout_seconds: u64,
    pub inbound_timeout_seconds: u64,
    pub outbound_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub local_endpoint: SocketAddr,
    pub network: NetworkConfig,
    pub timeouts: TimeoutsConfig,
    pub tls: TlsConfig,
    pub nat: NatOption,
    /// Seed and regular peer addresses to dial on startup, seeds first.
    pub seed_peers: Vec<SocketAddr>,
    pub regular_peers: Vec<SocketAddr>,
    /// Protocol version this node speaks and the range of remote versions
    /// it accepts; default and min/max are all `170002` (spec.md §6).
    pub protocol_version: i32,
    pub min_supported_protocol_version: i32,
    pub max_supported_protocol_version: i32,
    pub max_connections: usize,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            ping_interval_seconds: 120,
            ping_timeout_milliseconds: 20_000,
            protocol_handshake_timeout_seconds: 60,
            inbound_timeout_seconds: 60,
            outbound_timeout_seconds: 60,
            idle_timeout_seconds: 90 * 60,
        }
    }
}

impl Config {
    /// The endpoint this node advertises to peers, honoring [`NatOption`].
    /// `auto`/`explicit-ip` substitute the host; `none` advertises the bound
    /// local endpoint unchanged.
    pub fn advertised_endpoint(&self, bound: SocketAddr) -> SocketAddr {
        match &self.nat {
            NatOption::None => bound,
            NatOption::Auto => bound,
            NatOption::ExplicitIp(ip) => SocketAddr::new(*ip, bound.port()),
        }
    }

    pub fn port_or_default(&self) -> u16 {
        if self.local_endpoint.port() == 0 {
            self.network.default_port
        } else {
            self.local_endpoint.port()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_config() -> Config {
        Config {
            local_endpoint: "0.0.0.0:18444".parse().unwrap(),
            network: NetworkConfig { magic: 0xDAB5_BFFA, nonce: 42, default_port: 18333 },
            timeouts: TimeoutsConfig::default(),
            tls: TlsConfig { directory: PathBuf::from("/tmp/tls"), key_password: None },
            nat: NatOption::None,
            seed_peers: vec![],
            regular_peers: vec![],
            protocol_version: 170_002,
            min_supported_protocol_version: 170_002,
            max_supported_protocol_version: 170_002,
            max_connections: 125,
        }
    }

    #[test]
    fn explicit_ip_overrides_advertised_host() {
        let mut config = sample_config();
        config.nat = NatOption::ExplicitIp(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)));
        let bound: SocketAddr = "192.168.1.5:18444".parse().unwrap();
        assert_eq!(config.advertised_endpoint(bound).ip(), config_ip(&config));
        assert_eq!(config.advertised_endpoint(bound).port(), 18444);
    }

    fn config_ip(config: &Config) -> IpAddr {
        match &config.nat {
            NatOption::ExplicitIp(ip) => *ip,
            _ => panic!("expected ExplicitIp"),
        }
    }

    #[test]
    fn zero_port_falls_back_to_chain_default() {
        let mut config = sample_config();
        config.local_endpoint = "0.0.0.0:0".parse().unwrap();
        assert_eq!(config.port_or_default(), 18333);
    }
}
