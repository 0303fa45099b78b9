/**
 * dmux_core — the demultiplexing pipeline engine.
 *
 * Connects a single ordered message source to a pool of parallel sinks:
 * a dispatcher reads from the source and fans messages out to lane
 * channels via a pluggable distributor, each lane drains to a cloned sink
 * (one message at a time, or in fixed-size batches), a circuit breaker
 * guards every lane against downstream failure, and a small control
 * protocol supports live resizing and graceful shutdown of the lane pool.
 *
 * End users depend on the `dmux` facade crate, which re-exports this
 * crate's public surface. `dmux_core` is where the engine itself lives.
 *
 * # Architecture
 *
 * - `Dmux::connect()` spawns a `dmux-dispatch` thread and a `dmux-source`
 *   thread, wires up the sink's `Breaker` and its `dmux-breaker` monitor
 *   thread, and returns a handle immediately.
 * - `resize()`/`stop()` are synchronous RPCs serviced by the dispatch
 *   thread's control loop, which gives them priority over inbound data.
 * - `join()`/`await_termination()` block on the dispatcher's terminal
 *   outcome: `Ok(())` for a graceful stop, `Err(DmuxError::Fatal)` if a
 *   source or sink thread panicked.
 */

// ---------------------------------------------------------------------------
// Module declarations (all private — public surface is re-exports only)
// ---------------------------------------------------------------------------

mod breaker;
mod config;
mod control;
mod dispatcher;
mod distributor;
mod error;
mod lane;
mod traits;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use breaker::{Breaker, BreakerConfig, BreakerRejected, BreakerState, MonitorEvent};
pub use config::DmuxConfig;
pub use control::{ControlKind, ControlMessage, ControlStatus, ResponseMessage};
pub use dispatcher::Dmux;
pub use distributor::{Distributor, HashDistributor, RoundRobinDistributor};
pub use error::DmuxError;
pub use traits::{Sink, Source};
