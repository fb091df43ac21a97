//! The read/write loop driving one [`Peer`] (spec.md §4.4, §5): a single
//! task owns the peer's mutable state and its transport, so peer-internal
//! fields need no locking (the per-peer "strand" design note in spec.md §9).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::ThreadRng;
use rand::thread_rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TimeoutsConfig;
use crate::error::Error;
use crate::handler::ApplicationHandler;
use crate::peer::dispatch::{dispatch_inbound, DisconnectReason, DispatchAction, DispatchContext};
use crate::peer::idle::evaluate_idle;
use crate::peer::payloads::{encode_nonce, VersionPayload};
use crate::peer::transport::Transport;
use crate::peer::{Direction, Peer, PeerId, PeerLifecycle};
use crate::wire::{ByteStream, HeaderFieldsHandle, Message, MessageKind, ParseOutcome, Scope};

/// No more than this many complete messages may be processed per single
/// read completion (spec.md §4.4).
const MAX_MESSAGES_PER_READ: usize = 32;
/// Upper bound on bytes written per write-loop iteration (spec.md §4.4).
const MAX_BYTES_PER_IO: usize = 256 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;
const SERVICE_TICK: std::time::Duration = std::time::Duration::from_secs(2);

/// Work enqueued onto a running peer from outside its task.
pub enum OutboundCommand {
    Send { kind: MessageKind, payload: Vec<u8> },
    /// Cooperative stop: in-flight I/O is abandoned at the next suspension
    /// point, `wait` callers block on the paired [`oneshot::Receiver`]
    /// returned from [`spawn_peer`].
    Stop,
}

pub struct PeerRuntimeConfig {
    pub magic: u32,
    pub timeouts: TimeoutsConfig,
    pub dispatch: DispatchContext,
    pub outbound_queue_capacity: usize,
}

/// Atomic byte counters the peer task updates on every send/receive. Shared
/// with the Hub's registry so bandwidth metering never needs to round-trip
/// through the peer's command channel (spec.md §5: "Counters ... atomic").
#[derive(Debug, Default)]
pub struct PeerBandwidth {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl PeerBandwidth {
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

/// A handle the Hub's registry keeps: enough to enqueue outbound work and
/// to request a stop, without holding the peer's private state.
pub struct PeerHandle {
    pub id: PeerId,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    pub bandwidth: Arc<PeerBandwidth>,
    sender: mpsc::Sender<OutboundCommand>,
}

impl PeerHandle {
    pub async fn send(&self, kind: MessageKind, payload: Vec<u8>) -> bool {
        self.sender.send(OutboundCommand::Send { kind, payload }).await.is_ok()
    }

    pub async fn stop(&self) {
        let _ = self.sender.send(OutboundCommand::Stop).await;
    }
}

/// Spawns the per-peer task. Returns a [`PeerHandle`] for the registry and
/// a [`oneshot::Receiver`] that resolves once the peer has fully stopped,
/// for `Hub::stop(wait = true)`.
pub fn spawn_peer(
    peer: Peer,
    transport: Transport,
    handler: Arc<dyn ApplicationHandler>,
    clock: Arc<dyn Clock>,
    config: PeerRuntimeConfig,
) -> (PeerHandle, oneshot::Receiver<PeerId>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
    let (stopped_tx, stopped_rx) = oneshot::channel();
    let id = peer.id;
    let remote_addr = peer.remote_addr;
    let direction = peer.direction;
    let bandwidth = Arc::new(PeerBandwidth::default());

    tokio::spawn(run_peer(peer, transport, outbound_rx, handler, clock, config, Arc::clone(&bandwidth), stopped_tx));

    (PeerHandle { id, remote_addr, direction, bandwidth, sender: outbound_tx }, stopped_rx)
}

async fn run_peer(
    mut peer: Peer,
    mut transport: Transport,
    mut outbound_rx: mpsc::Receiver<OutboundCommand>,
    handler: Arc<dyn ApplicationHandler>,
    clock: Arc<dyn Clock>,
    config: PeerRuntimeConfig,
    bandwidth: Arc<PeerBandwidth>,
    stopped_tx: oneshot::Sender<PeerId>,
) {
    peer.lifecycle = PeerLifecycle::Running;
    let mut rng = thread_rng();

    if let Err(err) = send_initial_version(&mut peer, &mut transport, &config, &bandwidth, clock.as_ref()).await {
        warn!(peer = peer.id.0, error = %err, "failed sending initial version");
        finish(peer, &handler, Some(err.to_string()), stopped_tx).await;
        return;
    }

    let mut read_buf = ByteStream::new(peer.negotiated_version, Scope::Network);
    let mut parse_mode: Option<HeaderFieldsHandle> = None;
    let mut io_buf = vec![0u8; READ_CHUNK_SIZE];
    let mut ticker = tokio::time::interval(SERVICE_TICK);

    let disconnect_reason: Option<String> = 'outer: loop {
        tokio::select! {
            read_result = transport.read(&mut io_buf) => {
                match read_result {
                    Ok(0) => break 'outer None,
                    Ok(n) => {
                        peer.mark_inbound_message_started(clock.now());
                        read_buf.write(&io_buf[..n]);
                        bandwidth.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                        let outcome = drain_messages(
                            &mut peer, &mut transport, &mut read_buf, &mut parse_mode,
                            &config, &handler, clock.as_ref(), &bandwidth, &mut rng,
                        ).await;
                        match outcome {
                            Ok(DrainOutcome::Continue) => read_buf.shrink(),
                            Ok(DrainOutcome::Disconnect(reason)) => break 'outer Some(reason),
                            Err(err) => break 'outer Some(err.to_string()),
                        }
                    }
                    Err(err) => break 'outer Some(err.to_string()),
                }
            }
            maybe_cmd = outbound_rx.recv() => {
                match maybe_cmd {
                    Some(OutboundCommand::Send { kind, payload }) => {
                        if let Err(err) = send_message(&mut peer, &mut transport, kind, &payload, &config, clock.as_ref(), &bandwidth).await {
                            break 'outer Some(err.to_string());
                        }
                    }
                    Some(OutboundCommand::Stop) | None => break 'outer None,
                }
            }
            _ = ticker.tick() => {
                let now = clock.now();
                if let Some(reason) = evaluate_idle(&peer, now, &config.timeouts) {
                    break 'outer Some(reason.to_string());
                }
                if peer.handshake.completed() && peer.keepalive.ping_due(now) {
                    let nonce = peer.keepalive.start_ping(now, &mut rng);
                    if let Err(err) = send_message(&mut peer, &mut transport, MessageKind::Ping, &encode_nonce(nonce), &config, clock.as_ref(), &bandwidth).await {
                        break 'outer Some(err.to_string());
                    }
                }
            }
        }
    };

    finish(peer, &handler, disconnect_reason, stopped_tx).await;
}

enum DrainOutcome {
    Continue,
    Disconnect(String),
}

#[allow(clippy::too_many_arguments)]
async fn drain_messages(
    peer: &mut Peer,
    transport: &mut Transport,
    read_buf: &mut ByteStream,
    parse_mode: &mut Option<HeaderFieldsHandle>,
    config: &PeerRuntimeConfig,
    handler: &Arc<dyn ApplicationHandler>,
    clock: &dyn Clock,
    bandwidth: &Arc<PeerBandwidth>,
    rng: &mut ThreadRng,
) -> crate::error::Result<DrainOutcome> {
    let mut processed = 0usize;
    loop {
        if processed >= MAX_MESSAGES_PER_READ {
            return Err(Error::from(crate::error::ProtocolError::MessagesFlooding));
        }

        match Message::try_parse(read_buf, parse_mode, config.magic, peer.negotiated_version) {
            Ok(ParseOutcome::NeedMoreBytes) => {
                return Ok(DrainOutcome::Continue);
            }
            Ok(ParseOutcome::Ready(message)) => {
                processed += 1;
                let now = clock.now();
                let bytes = message.payload.len() as u64;
                let kind = message.kind;

                let action = dispatch_inbound(peer, message, now, &config.dispatch)?;
                peer.mark_inbound_message_finished(now, kind, bytes);

                match action {
                    DispatchAction::None => {
                        // A successful pong leaves the keep-alive timer idle
                        // again; arm the next jittered interval from here
                        // rather than pinging again on the very next tick
                        // (spec.md §4.4).
                        if kind == MessageKind::Pong && peer.keepalive.is_idle() {
                            peer.keepalive.schedule_next_ping(now, config.timeouts.ping_interval_seconds, rng);
                        }
                    }
                    DispatchAction::Reply(replies) => {
                        for (reply_kind, payload) in replies {
                            send_message(peer, transport, reply_kind, &payload, config, clock, bandwidth).await?;
                            match reply_kind {
                                MessageKind::Version => peer
                                    .handshake
                                    .on_local_version_sent()
                                    .expect("peer never sends version twice"),
                                MessageKind::Verack => peer
                                    .handshake
                                    .on_remote_verack_sent()
                                    .expect("peer never sends verack twice"),
                                _ => {}
                            }
                        }
                    }
                    DispatchAction::Forward(message) => handler.on_message(peer.id, message),
                    DispatchAction::Disconnect(reason) => return Ok(DrainOutcome::Disconnect(describe(reason))),
                }

                if peer.handshake.take_completion_edge() {
                    on_handshake_completed(peer, transport, config, clock, bandwidth, rng).await?;
                }
            }
            Err(err) if err.is_recoverable() => return Ok(DrainOutcome::Continue),
            Err(err) => return Err(err),
        }
    }
}

fn describe(reason: DisconnectReason) -> String {
    match reason {
        DisconnectReason::SelfConnect => "connected to self".to_string(),
        DisconnectReason::SeedOutboundDone => "seed-outbound finished harvesting addresses".to_string(),
        DisconnectReason::Protocol(err) => err.to_string(),
    }
}

/// Runs exactly once, on the transition into `completed()` (spec.md §4.4):
/// seed-outbound peers request addresses, and every peer gets an immediate
/// ping to seed its keep-alive timer.
async fn on_handshake_completed(
    peer: &mut Peer,
    transport: &mut Transport,
    config: &PeerRuntimeConfig,
    clock: &dyn Clock,
    bandwidth: &Arc<PeerBandwidth>,
    rng: &mut ThreadRng,
) -> crate::error::Result<()> {
    info!(peer = peer.id.0, direction = ?peer.direction, "handshake completed");

    if peer.direction == Direction::SeedOutbound {
        send_message(peer, transport, MessageKind::GetAddr, &[], config, clock, bandwidth).await?;
    }

    let nonce = peer.keepalive.start_ping(clock.now(), rng);
    send_message(peer, transport, MessageKind::Ping, &encode_nonce(nonce), config, clock, bandwidth).await?;
    Ok(())
}

/// Outbound peers send `version` first, before anything else crosses the
/// wire (spec.md §3: "Outbound peers MUST send version first"). Inbound
/// peers wait for the remote's `version` instead (handled in
/// [`dispatch::on_version`](crate::peer::dispatch)).
async fn send_initial_version(
    peer: &mut Peer,
    transport: &mut Transport,
    config: &PeerRuntimeConfig,
    bandwidth: &Arc<PeerBandwidth>,
    clock: &dyn Clock,
) -> crate::error::Result<()> {
    if !peer.direction.is_outbound() {
        return Ok(());
    }

    let ctx = &config.dispatch;
    let version = VersionPayload::now(
        ctx.local_protocol_version,
        ctx.local_services,
        peer.remote_addr,
        ctx.advertised_addr,
        ctx.local_nonce,
        ctx.user_agent.clone(),
        ctx.chain_tip_height,
    );
    send_message(peer, transport, MessageKind::Version, &version.encode(), config, clock, bandwidth).await?;
    peer.handshake.on_local_version_sent().expect("peer never sends version twice");
    Ok(())
}

async fn send_message(
    peer: &mut Peer,
    transport: &mut Transport,
    kind: MessageKind,
    payload: &[u8],
    config: &PeerRuntimeConfig,
    clock: &dyn Clock,
    bandwidth: &Arc<PeerBandwidth>,
) -> crate::error::Result<()> {
    peer.mark_outbound_message_started(clock.now());
    let stream = Message::push(kind, payload, config.magic, peer.negotiated_version)?;
    let bytes = stream.as_slice();

    for chunk in bytes.chunks(MAX_BYTES_PER_IO) {
        transport.write_all(chunk).await.map_err(Error::from)?;
    }
    transport.flush().await.map_err(Error::from)?;

    bandwidth.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
    peer.mark_outbound_message_finished(clock.now(), kind, bytes.len() as u64);
    Ok(())
}

async fn finish(
    mut peer: Peer,
    handler: &Arc<dyn ApplicationHandler>,
    reason: Option<String>,
    stopped_tx: oneshot::Sender<PeerId>,
) {
    peer.lifecycle = PeerLifecycle::Stopped;
    debug!(peer = peer.id.0, reason = ?reason, "peer stopped");
    handler.on_peer_disconnected(peer.id, reason);
    let _ = stopped_tx.send(peer.id);
}
