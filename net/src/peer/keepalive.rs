//! Ping/pong keep-alive timer and EMA latency tracking (spec.md §4.4).

use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::ProtocolError;

/// α for the EMA latency filter: the newest sample weighs 0.65.
const EMA_ALPHA: f64 = 0.65;

#[derive(Debug, Default)]
pub struct KeepAlive {
    /// 0 = idle, non-zero = awaiting a pong with this nonce.
    ping_nonce: u64,
    last_ping_sent_at: Option<Instant>,
    /// When the next keep-alive ping should fire; `None` only before the
    /// very first ping (sent unconditionally on handshake completion).
    next_ping_due_at: Option<Instant>,
    min_latency: Option<Duration>,
    ema_latency_ms: Option<f64>,
}

impl KeepAlive {
    pub fn new() -> Self {
        KeepAlive::default()
    }

    pub fn is_idle(&self) -> bool {
        self.ping_nonce == 0
    }

    pub fn outstanding_ping_since(&self) -> Option<Instant> {
        if self.ping_nonce == 0 {
            None
        } else {
            self.last_ping_sent_at
        }
    }

    pub fn min_latency(&self) -> Option<Duration> {
        self.min_latency
    }

    /// Arms the next keep-alive ping at `now + jittered(base_seconds, ±30%)`
    /// (spec.md §4.4). Called once a pong completes the round trip, so the
    /// timer restarts from the moment the peer went idle again.
    pub fn schedule_next_ping(&mut self, now: Instant, base_seconds: u64, rng: &mut impl Rng) {
        self.next_ping_due_at = Some(now + jittered_ping_interval(base_seconds, rng));
    }

    /// Whether the keep-alive timer has fired: no ping outstanding, and
    /// either no ping has ever been scheduled yet or the scheduled time has
    /// passed.
    pub fn ping_due(&self, now: Instant) -> bool {
        self.is_idle() && self.next_ping_due_at.map_or(true, |due| now >= due)
    }

    pub fn ema_latency_ms(&self) -> Option<f64> {
        self.ema_latency_ms
    }

    /// Picks a random non-zero nonce and arms the outstanding-ping state.
    pub fn start_ping(&mut self, now: Instant, rng: &mut impl Rng) -> u64 {
        let nonce = loop {
            let candidate = rng.gen::<u64>();
            if candidate != 0 {
                break candidate;
            }
        };
        self.ping_nonce = nonce;
        self.last_ping_sent_at = Some(now);
        nonce
    }

    /// Handles an inbound pong. Clears the outstanding nonce and updates
    /// latency statistics on a match; errors without mutating state
    /// otherwise.
    pub fn on_pong(&mut self, nonce: u64, now: Instant) -> Result<Duration, ProtocolError> {
        if self.ping_nonce == 0 {
            return Err(ProtocolError::unexpected_pong_no_outstanding_ping());
        }
        if nonce != self.ping_nonce {
            return Err(ProtocolError::MismatchingPingPongNonce);
        }

        let sent_at = self.last_ping_sent_at.expect("ping_nonce set implies last_ping_sent_at set");
        let latency = now.saturating_duration_since(sent_at);

        self.min_latency = Some(self.min_latency.map_or(latency, |min| min.min(latency)));
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.ema_latency_ms = Some(match self.ema_latency_ms {
            None => latency_ms,
            Some(prev) => EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * prev,
        });

        self.ping_nonce = 0;
        Ok(latency)
    }
}

/// `base_seconds` jittered by up to ±30%, converted to milliseconds.
pub fn jittered_ping_interval(base_seconds: u64, rng: &mut impl Rng) -> Duration {
    let jitter_fraction = rng.gen_range(-0.30..=0.30);
    let millis = (base_seconds as f64 * 1000.0) * (1.0 + jitter_fraction);
    Duration::from_millis(millis.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn matching_pong_clears_nonce_and_seeds_ema() {
        let mut keepalive = KeepAlive::new();
        let mut rng = StdRng::seed_from_u64(1);
        let t0 = Instant::now();
        let nonce = keepalive.start_ping(t0, &mut rng);
        assert!(!keepalive.is_idle());

        let t1 = t0 + Duration::from_millis(50);
        let latency = keepalive.on_pong(nonce, t1).unwrap();
        assert_eq!(latency, Duration::from_millis(50));
        assert!(keepalive.is_idle());
        assert_eq!(keepalive.min_latency(), Some(Duration::from_millis(50)));
        assert_eq!(keepalive.ema_latency_ms(), Some(50.0));
    }

    #[test]
    fn ema_blends_subsequent_samples() {
        let mut keepalive = KeepAlive::new();
        let mut rng = StdRng::seed_from_u64(2);
        let t0 = Instant::now();

        let n1 = keepalive.start_ping(t0, &mut rng);
        keepalive.on_pong(n1, t0 + Duration::from_millis(100)).unwrap();
        assert_eq!(keepalive.ema_latency_ms(), Some(100.0));

        let n2 = keepalive.start_ping(t0, &mut rng);
        keepalive.on_pong(n2, t0 + Duration::from_millis(200)).unwrap();
        // ema = 0.65*200 + 0.35*100 = 165.0
        assert!((keepalive.ema_latency_ms().unwrap() - 165.0).abs() < 1e-9);
    }

    #[test]
    fn mismatching_nonce_is_rejected_without_clearing_state() {
        let mut keepalive = KeepAlive::new();
        let mut rng = StdRng::seed_from_u64(3);
        let t0 = Instant::now();
        let nonce = keepalive.start_ping(t0, &mut rng);

        let err = keepalive.on_pong(nonce.wrapping_add(1), t0).unwrap_err();
        assert_eq!(err, ProtocolError::MismatchingPingPongNonce);
        assert!(!keepalive.is_idle());
    }

    #[test]
    fn pong_without_outstanding_ping_is_rejected() {
        let mut keepalive = KeepAlive::new();
        let err = keepalive.on_pong(7, Instant::now()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessageState { .. }));
    }

    #[test]
    fn jitter_stays_within_30_percent() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..100 {
            let interval = jittered_ping_interval(120, &mut rng);
            assert!(interval >= Duration::from_millis((120_000.0 * 0.70) as u64));
            assert!(interval <= Duration::from_millis((120_000.0 * 1.30) as u64));
        }
    }

    #[test]
    fn ping_due_before_first_schedule_but_not_after() {
        let mut keepalive = KeepAlive::new();
        let mut rng = StdRng::seed_from_u64(5);
        let t0 = Instant::now();
        assert!(keepalive.ping_due(t0));

        keepalive.schedule_next_ping(t0, 120, &mut rng);
        assert!(!keepalive.ping_due(t0));
        assert!(keepalive.ping_due(t0 + Duration::from_secs(200)));
    }

    #[test]
    fn ping_due_is_false_while_a_ping_is_outstanding() {
        let mut keepalive = KeepAlive::new();
        let mut rng = StdRng::seed_from_u64(6);
        let t0 = Instant::now();
        keepalive.start_ping(t0, &mut rng);
        assert!(!keepalive.ping_due(t0 + Duration::from_secs(1_000)));
    }
}
