/*!
 * Circuit breaker — per-sink failure accounting and load shedding.
 *
 * A `Breaker` is shared (via `Arc`) by every lane worker consuming a given
 * sink. Lanes report the outcome of each attempt on a single shared
 * `monitor` channel; a dedicated breaker thread (spawned by
 * `Breaker::spawn_monitor`) accumulates those outcomes into a rolling
 * window and broadcasts state transitions to each lane's single-slot
 * signal channel. `place_breaker` is the synchronous half — callable
 * directly from a `Sink::consume` implementation — that decides whether
 * a given attempt may proceed at all.
 */
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

/**
 * Outcome of a single sink attempt, reported on the monitor channel.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The sink completed the attempt without error.
    Success,
    /// The sink completed the attempt and reported an error.
    Failed,
    /// The attempt was shed by the breaker and never reached the sink.
    NotProcessed,
}

/// Observable breaker state, as broadcast to lane signal channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

fn state_from_u8(raw: u8) -> BreakerState {
    match raw {
        STATE_OPEN => BreakerState::Open,
        STATE_HALF_OPEN => BreakerState::HalfOpen,
        _ => BreakerState::Closed,
    }
}

/// Tunables for the breaker's trip/cool-down behaviour.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Fraction of failed attempts within `window` that trips the breaker.
    /// Reference default: `0.25`.
    pub error_threshold: f64,
    /// Minimum number of attempts observed before the threshold is
    /// evaluated, avoiding a trip on the first unlucky failure.
    pub window: u32,
    /// How long the breaker stays `Open` before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 0.25,
            window: 20,
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Shared, swappable set of per-lane signal senders. The breaker's monitor
/// thread lives for the whole sink lifetime, but lane sets are replaced on
/// every `resize` — this lets the dispatcher hand the monitor thread a new
/// lane roster without restarting it (and losing its rolling window).
pub type SignalRegistry = Arc<Mutex<Vec<Sender<BreakerState>>>>;

/// Error returned by `place_breaker` when an attempt could not proceed,
/// or proceeded but the wrapped closure failed.
#[derive(Debug)]
pub enum BreakerRejected<E> {
    /// The breaker was Open (or another lane already held the HalfOpen
    /// probe slot); the closure never ran.
    Shed,
    /// The closure ran and returned this error.
    Inner(E),
}

/**
 * Shared, clonable handle to a sink's circuit breaker.
 *
 * `state` is an atomic so `place_breaker` (called from any lane thread)
 * never blocks on a lock to read it. `probe_in_flight` CAS-gates the
 * single probe permitted while `HalfOpen`, so two lanes racing to be the
 * first message after a trip don't both hit the downstream.
 */
#[derive(Clone)]
pub struct Breaker {
    state: Arc<AtomicU8>,
    probe_in_flight: Arc<AtomicBool>,
}

impl Breaker {
    /// Creates a new breaker in the `Closed` state.
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(STATE_CLOSED)),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current observable state.
    pub fn state(&self) -> BreakerState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    /**
     * Wraps a critical section with breaker accounting.
     *
     * - `Closed`: runs `critical`, reports `Success`/`Failed` on `monitor`.
     * - `Open`: sheds immediately, reports `NotProcessed`, never calls `critical`.
     * - `HalfOpen`: exactly one concurrent caller wins the probe slot (via
     *   CAS on `probe_in_flight`) and runs `critical`; everyone else sheds
     *   as if `Open`.
     *
     * Returns `Ok(())` on a successful (or successfully-probed) attempt,
     * `Err(BreakerRejected::Shed)` if shed, `Err(BreakerRejected::Inner(e))`
     * if `critical` ran and failed.
     */
    pub fn place_breaker<E>(
        &self,
        critical: impl FnOnce() -> Result<(), E>,
        monitor: &Sender<MonitorEvent>,
    ) -> Result<(), BreakerRejected<E>> {
        match self.state() {
            BreakerState::Closed => self.run_and_report(critical, monitor),
            BreakerState::Open => {
                let _ = monitor.try_send(MonitorEvent::NotProcessed);
                Err(BreakerRejected::Shed)
            }
            BreakerState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let result = self.run_and_report(critical, monitor);
                    self.probe_in_flight.store(false, Ordering::Release);
                    result
                } else {
                    let _ = monitor.try_send(MonitorEvent::NotProcessed);
                    Err(BreakerRejected::Shed)
                }
            }
        }
    }

    fn run_and_report<E>(
        &self,
        critical: impl FnOnce() -> Result<(), E>,
        monitor: &Sender<MonitorEvent>,
    ) -> Result<(), BreakerRejected<E>> {
        match critical() {
            Ok(()) => {
                let _ = monitor.try_send(MonitorEvent::Success);
                Ok(())
            }
            Err(e) => {
                let _ = monitor.try_send(MonitorEvent::Failed);
                Err(BreakerRejected::Inner(e))
            }
        }
    }

    /**
     * Spawns the breaker's monitor thread.
     *
     * Runs for the lifetime of the sink — a single monitor thread survives
     * across `resize` generations. Consumes `monitor_rx` until it
     * disconnects (dispatcher shutdown drops every lane's monitor sender).
     * `signal_txs` is read fresh on every broadcast, so the dispatcher can
     * swap in a new lane roster after a resize without restarting this
     * thread or losing the accumulated window.
     */
    pub fn spawn_monitor(
        &self,
        monitor_rx: Receiver<MonitorEvent>,
        signal_txs: SignalRegistry,
        config: BreakerConfig,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        let state = self.state.clone();
        thread::Builder::new()
            .name("dmux-breaker".into())
            .spawn(move || run_monitor_loop(state, monitor_rx, signal_txs, config))
    }
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new()
    }
}

fn broadcast(signal_txs: &SignalRegistry, state: BreakerState) {
    let guard = signal_txs.lock().expect("breaker signal registry poisoned");
    for tx in guard.iter() {
        match tx.try_send(state) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

fn run_monitor_loop(
    state: Arc<AtomicU8>,
    monitor_rx: Receiver<MonitorEvent>,
    signal_txs: SignalRegistry,
    config: BreakerConfig,
) {
    let mut total: u32 = 0;
    let mut failed: u32 = 0;
    let mut cooldown_deadline: Option<Instant> = None;

    loop {
        let timeout = match cooldown_deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(3600),
        };

        match monitor_rx.recv_timeout(timeout) {
            Ok(event) => {
                let current = state_from_u8(state.load(Ordering::Acquire));
                match current {
                    BreakerState::Closed => {
                        total += 1;
                        if event == MonitorEvent::Failed {
                            failed += 1;
                        }
                        if total >= config.window
                            && (failed as f64 / total as f64) > config.error_threshold
                        {
                            state.store(STATE_OPEN, Ordering::Release);
                            broadcast(&signal_txs, BreakerState::Open);
                            cooldown_deadline = Some(Instant::now() + config.cooldown);
                            total = 0;
                            failed = 0;
                        }
                    }
                    BreakerState::HalfOpen => match event {
                        MonitorEvent::Success => {
                            state.store(STATE_CLOSED, Ordering::Release);
                            cooldown_deadline = None;
                            total = 0;
                            failed = 0;
                        }
                        MonitorEvent::Failed => {
                            state.store(STATE_OPEN, Ordering::Release);
                            broadcast(&signal_txs, BreakerState::Open);
                            cooldown_deadline = Some(Instant::now() + config.cooldown);
                        }
                        MonitorEvent::NotProcessed => {}
                    },
                    BreakerState::Open => {}
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if state.load(Ordering::Acquire) == STATE_OPEN {
                    state.store(STATE_HALF_OPEN, Ordering::Release);
                    broadcast(&signal_txs, BreakerState::HalfOpen);
                    cooldown_deadline = None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
