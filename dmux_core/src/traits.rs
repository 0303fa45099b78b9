/*!
 * External collaborator interfaces: `Source`, and `Sink`.
 *
 * `Distributor` lives in its own module (`distributor.rs`) since it ships
 * with concrete strategies; these two are pure contracts the caller
 * supplies an implementation for.
 */
use crossbeam_channel::{Receiver, Sender};

use crate::breaker::{Breaker, BreakerRejected, BreakerState, MonitorEvent};

/**
 * Input side of a `Dmux`: produces messages onto a channel until told to
 * stop.
 *
 * A `Source` is shared (`Arc<dyn Source<M>>`) between the thread running
 * `generate` and the dispatcher thread that may call `stop` concurrently,
 * hence the `Sync` bound and `&self` receivers — implementations own
 * whatever interior state they need to make `stop` observable from
 * `generate` (an `AtomicBool`, a second channel, etc.).
 */
pub trait Source<M>: Send + Sync + 'static {
    /// Writes messages into `out` indefinitely. Invoked once, on a
    /// dedicated background thread, by `Dmux::connect`. MUST tolerate
    /// `out`'s receiver having been dropped (no panic) — shutdown drops
    /// the dispatcher's end of the channel only after calling `stop`,
    /// but a slow producer may still observe a closed channel briefly.
    fn generate(&self, out: Sender<M>);

    /// Requests graceful termination. MUST cause a concurrently running
    /// `generate` to return in bounded time.
    fn stop(&self);
}

/**
 * Output side of a `Dmux`: consumes messages handed to it by a lane
 * worker.
 *
 * Implementations are `Clone` rather than exposing a hand-rolled
 * `clone_sink()` method — stateless sinks can `#[derive(Clone)]` a unit
 * struct or wrap shared state in an `Arc`, and stateful per-lane sinks
 * clone whatever they need to duplicate.
 */
pub trait Sink<M>: Clone + Send + 'static {
    /// Consumes a single message. Should emit exactly one `MonitorEvent`
    /// onto `monitor` per attempt (directly, or via `place_breaker`).
    fn consume(
        &self,
        msg: M,
        breaker_signal: &Receiver<BreakerState>,
        monitor: &Sender<MonitorEvent>,
    );

    /// Consumes a batch of messages gathered by a batched-mode lane
    /// worker, in sibling-channel order. `version` is opaque, passed
    /// through from `DmuxConfig` to select the sink's batching contract.
    fn batch_consume(
        &self,
        batch: Vec<M>,
        version: u32,
        breaker_signal: &Receiver<BreakerState>,
        monitor: &Sender<MonitorEvent>,
    );

    /// Returns the breaker guarding this sink's downstream calls. Called
    /// once by the dispatcher (on the first sink clone) to start the
    /// breaker's monitor thread.
    fn breaker(&self) -> &Breaker;

    /// Hook invoked once before any lane worker starts, on the original
    /// sink instance (before cloning). Default no-op; override to
    /// perform one-time setup beyond what `Breaker::new()` already does.
    fn init_breaker(&self) {}

    /// Convenience wrapper delegating to `self.breaker().place_breaker`.
    fn place_breaker<E>(
        &self,
        critical: impl FnOnce() -> Result<(), E>,
        monitor: &Sender<MonitorEvent>,
    ) -> Result<(), BreakerRejected<E>> {
        self.breaker().place_breaker(critical, monitor)
    }
}
