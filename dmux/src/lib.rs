/**
 * dmux — public facade over `dmux_core`.
 *
 * This crate re-exports the demultiplexing pipeline engine's public
 * surface: `Dmux` (the dispatcher handle), `DmuxConfig`, the `Source`/
 * `Sink`/`Distributor` traits external collaborators implement, the
 * shipped distributor strategies, the circuit breaker types, the control
 * protocol types, and the error taxonomy.
 *
 * There is no global SDK singleton and no addon crates to assemble here:
 * a `Dmux` is instance-scoped, constructed directly by the caller via
 * `Dmux::connect`, so this crate is a plain re-export rather than an
 * orchestration layer.
 */
pub use dmux_core::{
    Breaker, BreakerConfig, BreakerRejected, BreakerState, MonitorEvent,
    ControlKind, ControlMessage, ControlStatus, ResponseMessage,
    Distributor, HashDistributor, RoundRobinDistributor,
    Dmux, DmuxConfig, DmuxError,
    Sink, Source,
};
