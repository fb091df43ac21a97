//! The connection Hub (spec.md §4.5): accepts inbound connections, dials
//! configured peers, bootstraps TLS, and keeps the peer registry. Each
//! accepted/dialed connection becomes a [`Peer`] driven by its own
//! single-consumer task (`peer::connection::run_peer`); the Hub never
//! touches a peer's internal state directly, only its [`PeerHandle`] and
//! the atomic counters it exposes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::ApplicationHandler;
use crate::peer::connection::{spawn_peer, PeerHandle, PeerRuntimeConfig};
use crate::peer::dispatch::DispatchContext;
use crate::peer::{Direction, Peer, PeerId, PeerIdGenerator};
use crate::tls;

/// Default outbound queue depth for each spawned peer (spec.md §4.4,
/// "bounded FIFO outbound queue").
const OUTBOUND_QUEUE_CAPACITY: usize = 64;
const SERVICE_TICK: Duration = Duration::from_secs(2);
/// Upper bound on how long `stop(wait = true)` blocks for the registry to
/// drain, so a wedged peer can't hang shutdown forever.
const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

struct RegisteredPeer {
    handle: Arc<PeerHandle>,
    /// Snapshot of the peer's cumulative byte counters as of the last
    /// service tick, for Δbytes/Δseconds bandwidth accounting (spec.md
    /// §4.5, SPEC_FULL supplemented feature 3).
    last_bandwidth: (u64, u64),
}

#[derive(Debug, Default)]
struct HubStats {
    current_active_inbound: AtomicUsize,
    current_active_outbound: AtomicUsize,
    total_rejected_connections: AtomicU64,
    total_connections: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
}

/// A point-in-time read of the Hub's counters (spec.md §5, "atomic").
#[derive(Debug, Clone, Copy)]
pub struct HubCounters {
    pub current_active_inbound: usize,
    pub current_active_outbound: usize,
    pub total_rejected_connections: u64,
    pub total_connections: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}

pub struct Hub {
    config: Config,
    handler: Arc<dyn ApplicationHandler>,
    clock: Arc<dyn Clock>,
    server_tls: Arc<ServerConfig>,
    client_tls: Arc<ClientConfig>,
    registry: Mutex<HashMap<PeerId, RegisteredPeer>>,
    id_gen: Mutex<PeerIdGenerator>,
    stats: HubStats,
    advertised_addr: Mutex<SocketAddr>,
    chain_tip_height: AtomicI32,
    running: AtomicBool,
    shutdown: Notify,
}

impl Hub {
    /// Bootstraps TLS material (generating and persisting a fresh
    /// self-signed certificate if none is found, subject to
    /// `confirm_regeneration`) and builds both the server and client TLS
    /// configs (spec.md §4.5, startup step 1).
    pub fn new(
        config: Config,
        handler: Arc<dyn ApplicationHandler>,
        clock: Arc<dyn Clock>,
        confirm_regeneration: impl FnOnce() -> bool,
    ) -> Result<Self> {
        let material = tls::ensure_tls_material(&config.tls, confirm_regeneration)?;
        let server_tls = tls::build_server_config(&material)?;
        let client_tls = tls::build_client_config();
        let advertised_addr = Mutex::new(config.local_endpoint);

        Ok(Hub {
            config,
            handler,
            clock,
            server_tls,
            client_tls,
            registry: Mutex::new(HashMap::new()),
            id_gen: Mutex::new(PeerIdGenerator::new()),
            stats: HubStats::default(),
            advertised_addr,
            chain_tip_height: AtomicI32::new(0),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Updates the chain tip height embedded in future outbound `version`
    /// payloads. The core carries no block index itself (spec.md §1
    /// Non-goals); the application calls this as its own tip advances.
    pub fn set_chain_tip_height(&self, height: i32) {
        self.chain_tip_height.store(height, Ordering::Relaxed);
    }

    pub fn counters(&self) -> HubCounters {
        HubCounters {
            current_active_inbound: self.stats.current_active_inbound.load(Ordering::Relaxed),
            current_active_outbound: self.stats.current_active_outbound.load(Ordering::Relaxed),
            total_rejected_connections: self.stats.total_rejected_connections.load(Ordering::Relaxed),
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            total_bytes_sent: self.stats.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.stats.total_bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Binds the acceptor, resolves the advertised address, and runs the
    /// accept loop, dial-out, and service tick concurrently until
    /// [`Hub::stop`] is called (spec.md §4.5, startup steps 2-3).
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let bind_addr = SocketAddr::new(self.config.local_endpoint.ip(), self.config.port_or_default());
        let listener = TcpListener::bind(bind_addr).await.map_err(Error::from)?;
        let bound = listener.local_addr().map_err(Error::from)?;
        *self.advertised_addr.lock() = self.config.advertised_endpoint(bound);
        self.running.store(true, Ordering::SeqCst);
        info!(bound = %bound, advertised = %self.advertised_addr.lock(), "hub listening");

        let accept_task = tokio::spawn(Arc::clone(&self).accept_loop(listener));
        let service_task = tokio::spawn(Arc::clone(&self).service_loop());
        let dial_task = tokio::spawn(Arc::clone(&self).dial_out());

        self.shutdown.notified().await;
        accept_task.abort();
        service_task.abort();
        let _ = dial_task.await;
        Ok(())
    }

    /// Cancels the acceptor and service timer and asks every registered
    /// peer to stop. `wait = true` blocks until the registry has drained or
    /// [`STOP_WAIT_TIMEOUT`] elapses (spec.md §4.5, SPEC_FULL supplemented
    /// feature 4).
    pub async fn stop(&self, wait: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();

        let handles: Vec<Arc<PeerHandle>> = self.registry.lock().values().map(|p| Arc::clone(&p.handle)).collect();
        for handle in &handles {
            handle.stop().await;
        }

        if wait {
            let deadline = tokio::time::Instant::now() + STOP_WAIT_TIMEOUT;
            while !self.registry.lock().is_empty() {
                if tokio::time::Instant::now() >= deadline {
                    warn!("stop(wait = true) timed out with peers still registered");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, remote_addr)) => {
                    if self.registry.lock().len() >= self.config.max_connections {
                        self.stats.total_rejected_connections.fetch_add(1, Ordering::Relaxed);
                        debug!(remote = %remote_addr, "rejected: max connections exceeded");
                        drop(socket);
                        continue;
                    }
                    let hub = Arc::clone(&self);
                    tokio::spawn(async move { hub.accept_one(socket, remote_addr).await });
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn accept_one(self: Arc<Self>, socket: TcpStream, remote_addr: SocketAddr) {
        let acceptor = TlsAcceptor::from(Arc::clone(&self.server_tls));
        match acceptor.accept(socket).await {
            Ok(tls_stream) => {
                let transport = crate::peer::transport::Transport::Server(Box::new(tls_stream));
                self.register_peer(transport, remote_addr, Direction::Inbound).await;
            }
            Err(err) => {
                warn!(remote = %remote_addr, error = %err, "TLS accept failed");
            }
        }
    }

    /// Dials seed peers first, then regular peers, per spec.md §4.5. Seed
    /// peers are marked `seed-outbound`: they're disconnected once they've
    /// answered `getaddr` (`peer::dispatch::on_getaddr`).
    async fn dial_out(self: Arc<Self>) {
        for &addr in &self.config.seed_peers {
            Arc::clone(&self).dial_one(addr, Direction::SeedOutbound).await;
        }
        for &addr in &self.config.regular_peers {
            Arc::clone(&self).dial_one(addr, Direction::Outbound).await;
        }
    }

    async fn dial_one(self: Arc<Self>, addr: SocketAddr, direction: Direction) {
        let socket = match TcpStream::connect(addr).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(remote = %addr, error = %err, "dial failed");
                return;
            }
        };

        let server_name = ServerName::try_from(addr.ip().to_string())
            .unwrap_or_else(|_| ServerName::try_from("node").expect("static name is valid"));
        let connector = TlsConnector::from(Arc::clone(&self.client_tls));
        match connector.connect(server_name, socket).await {
            Ok(tls_stream) => {
                let transport = crate::peer::transport::Transport::Client(Box::new(tls_stream));
                self.register_peer(transport, addr, direction).await;
            }
            Err(err) => {
                warn!(remote = %addr, error = %err, "TLS connect failed");
            }
        }
    }

    async fn register_peer(self: Arc<Self>, transport: crate::peer::transport::Transport, remote_addr: SocketAddr, direction: Direction) {
        if let Err(err) = transport.set_socket_options() {
            warn!(remote = %remote_addr, error = %err, "failed setting socket options");
        }

        let id = self.id_gen.lock().next();
        let peer = Peer::new(id.0, remote_addr, direction, self.clock.now());
        let runtime_config = PeerRuntimeConfig {
            magic: self.config.network.magic,
            timeouts: self.config.timeouts.clone(),
            dispatch: self.dispatch_context(),
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
        };

        let (handle, stopped_rx) = spawn_peer(peer, transport, Arc::clone(&self.handler), Arc::clone(&self.clock), runtime_config);
        let handle = Arc::new(handle);

        match direction {
            Direction::Inbound => self.stats.current_active_inbound.fetch_add(1, Ordering::Relaxed),
            Direction::Outbound | Direction::SeedOutbound => self.stats.current_active_outbound.fetch_add(1, Ordering::Relaxed),
        };
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        self.registry.lock().insert(id, RegisteredPeer { handle, last_bandwidth: (0, 0) });
        info!(peer = id.0, remote = %remote_addr, direction = ?direction, "peer registered");

        let hub = Arc::clone(&self);
        tokio::spawn(async move {
            let _ = stopped_rx.await;
            hub.reclaim(id, direction);
        });
    }

    fn reclaim(&self, id: PeerId, direction: Direction) {
        if self.registry.lock().remove(&id).is_some() {
            match direction {
                Direction::Inbound => self.stats.current_active_inbound.fetch_sub(1, Ordering::Relaxed),
                Direction::Outbound | Direction::SeedOutbound => self.stats.current_active_outbound.fetch_sub(1, Ordering::Relaxed),
            };
            debug!(peer = id.0, "peer reclaimed");
        }
    }

    /// Every 2s: fold each peer's cumulative bandwidth counters into the
    /// Hub-wide totals via snapshot-and-diff, and log the current counters.
    /// Idle-detection disconnects happen inside each peer's own task
    /// (`peer::connection::run_peer`), not here — the Hub never reaches
    /// into another task's owned [`Peer`] state (spec.md §5, "strand").
    /// Registry compaction happens eagerly in [`Hub::reclaim`] as each peer
    /// stops, rather than by polling here.
    async fn service_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SERVICE_TICK);
        loop {
            ticker.tick().await;
            self.service_tick();
        }
    }

    fn service_tick(&self) {
        let mut sent_delta = 0u64;
        let mut received_delta = 0u64;

        {
            let mut registry = self.registry.lock();
            for entry in registry.values_mut() {
                let sent = entry.handle.bandwidth.bytes_sent();
                let received = entry.handle.bandwidth.bytes_received();
                let (last_sent, last_received) = entry.last_bandwidth;
                sent_delta += sent.saturating_sub(last_sent);
                received_delta += received.saturating_sub(last_received);
                entry.last_bandwidth = (sent, received);
            }
        }

        self.stats.total_bytes_sent.fetch_add(sent_delta, Ordering::Relaxed);
        self.stats.total_bytes_received.fetch_add(received_delta, Ordering::Relaxed);

        let counters = self.counters();
        debug!(
            inbound = counters.current_active_inbound,
            outbound = counters.current_active_outbound,
            rejected = counters.total_rejected_connections,
            sent_per_tick = sent_delta,
            received_per_tick = received_delta,
            "service tick"
        );
    }

    fn dispatch_context(&self) -> DispatchContext {
        DispatchContext {
            local_nonce: self.config.network.nonce,
            local_protocol_version: self.config.protocol_version,
            local_services: 0,
            user_agent: format!("/net:{}/", env!("CARGO_PKG_VERSION")),
            advertised_addr: *self.advertised_addr.lock(),
            chain_tip_height: self.chain_tip_height.load(Ordering::Relaxed),
            min_supported_protocol_version: self.config.min_supported_protocol_version,
            max_supported_protocol_version: self.config.max_supported_protocol_version,
        }
    }
}
