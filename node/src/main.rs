use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use net::clock::SystemClock;
use net::config::{Config, NatOption, NetworkConfig, TimeoutsConfig, TlsConfig};
use net::encoding::decode_magic_hex;
use net::handler::NullHandler;
use net::signal::SignalCounter;
use net::Hub;
use tracing_subscriber::EnvFilter;

/// Default mainchain network magic, matching `examples/original_source`'s
/// default chain params.
const DEFAULT_MAGIC_HEX: &str = "0xDAB5BFFA";
const DEFAULT_PROTOCOL_VERSION: i32 = 170_002;

#[derive(Parser, Debug)]
#[command(version, about = "Peer-to-peer node networking core", long_about = None)]
struct Args {
    /// Local address to bind the acceptor to.
    #[arg(long, default_value = "0.0.0.0:0")]
    local_endpoint: SocketAddr,

    /// Network magic, as a hex string (with or without `0x`).
    #[arg(long, default_value = DEFAULT_MAGIC_HEX)]
    magic: String,

    /// Self-nonce embedded in outbound `version` payloads; a random value
    /// is generated if omitted.
    #[arg(long)]
    nonce: Option<u64>,

    /// Port to advertise/bind when `local_endpoint`'s port is 0.
    #[arg(long, default_value_t = 18444)]
    default_port: u16,

    /// Directory holding cert.pem/key.pem; defaults under the OS data dir.
    #[arg(long)]
    tls_directory: Option<PathBuf>,

    /// Optional PEM passphrase protecting the persisted private key.
    #[arg(long)]
    tls_key_password: Option<String>,

    /// Skip the interactive confirmation before (re)generating TLS material.
    #[arg(long)]
    yes: bool,

    /// Advertised-address policy: none, auto, or an explicit IP.
    #[arg(long, default_value = "none")]
    nat: String,

    /// Explicit IP to advertise when `--nat explicit-ip` is selected.
    #[arg(long)]
    nat_ip: Option<IpAddr>,

    /// Seed peers, dialed first and disconnected after harvesting addresses.
    #[arg(long = "seed-peer")]
    seed_peers: Vec<SocketAddr>,

    /// Regular peers, dialed and kept connected.
    #[arg(long = "peer")]
    regular_peers: Vec<SocketAddr>,

    #[arg(long, default_value_t = DEFAULT_PROTOCOL_VERSION)]
    protocol_version: i32,
    #[arg(long, default_value_t = DEFAULT_PROTOCOL_VERSION)]
    min_supported_protocol_version: i32,
    #[arg(long, default_value_t = DEFAULT_PROTOCOL_VERSION)]
    max_supported_protocol_version: i32,

    #[arg(long, default_value_t = 125)]
    max_connections: usize,

    #[arg(long, default_value_t = 120)]
    ping_interval_seconds: u64,
    #[arg(long, default_value_t = 20_000)]
    ping_timeout_milliseconds: u64,
    #[arg(long, default_value_t = 60)]
    protocol_handshake_timeout_seconds: u64,
    #[arg(long, default_value_t = 60)]
    inbound_timeout_seconds: u64,
    #[arg(long, default_value_t = 60)]
    outbound_timeout_seconds: u64,
    #[arg(long, default_value_t = 90 * 60)]
    idle_timeout_seconds: u64,

    /// `RUST_LOG`-style filter; falls back to the `RUST_LOG` env var, then `info`.
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_nat(args: &Args) -> anyhow::Result<NatOption> {
    match args.nat.as_str() {
        "none" => Ok(NatOption::None),
        "auto" => Ok(NatOption::Auto),
        "explicit-ip" => {
            let ip = args.nat_ip.context("--nat explicit-ip requires --nat-ip")?;
            Ok(NatOption::ExplicitIp(ip))
        }
        other => anyhow::bail!("unrecognized --nat value {other:?} (expected none, auto, or explicit-ip)"),
    }
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let magic = decode_magic_hex(&args.magic).context("parsing --magic")?;
    let nonce = args.nonce.unwrap_or_else(rand::random);
    let tls_directory = args.tls_directory.clone().unwrap_or_else(default_tls_directory);

    Ok(Config {
        local_endpoint: args.local_endpoint,
        network: NetworkConfig { magic, nonce, default_port: args.default_port },
        timeouts: TimeoutsConfig {
            ping_interval_seconds: args.ping_interval_seconds,
            ping_timeout_milliseconds: args.ping_timeout_milliseconds,
            protocol_handshake_timeout_seconds: args.protocol_handshake_timeout_seconds,
            inbound_timeout_seconds: args.inbound_timeout_seconds,
            outbound_timeout_seconds: args.outbound_timeout_seconds,
            idle_timeout_seconds: args.idle_timeout_seconds,
        },
        tls: TlsConfig { directory: tls_directory, key_password: args.tls_key_password.clone() },
        nat: parse_nat(args)?,
        seed_peers: args.seed_peers.clone(),
        regular_peers: args.regular_peers.clone(),
        protocol_version: args.protocol_version,
        min_supported_protocol_version: args.min_supported_protocol_version,
        max_supported_protocol_version: args.max_supported_protocol_version,
        max_connections: args.max_connections,
    })
}

fn default_tls_directory() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("net-node").join("tls")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let config = build_config(&args)?;
    let handler = Arc::new(NullHandler);
    let clock = Arc::new(SystemClock);
    let confirm = args.yes;

    let hub = Arc::new(Hub::new(config, handler, clock, || confirm).context("initializing TLS material")?);

    let run_hub = Arc::clone(&hub);
    let run_handle = tokio::spawn(async move { run_hub.run().await });

    let signals = SignalCounter::new();
    loop {
        tokio::signal::ctrl_c().await.context("installing ctrl-c handler")?;
        if signals.record() {
            tracing::error!("forced shutdown after repeated signals");
            std::process::exit(1);
        }
        tracing::info!("shutdown requested, stopping hub gracefully");
        hub.stop(true).await;
        break;
    }

    run_handle.await.context("hub task panicked")?.context("hub run failed")?;
    Ok(())
}
