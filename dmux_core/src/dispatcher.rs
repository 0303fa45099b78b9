/*!
 * The dispatcher (`Dmux`): fans inbound messages out to lane channels via a
 * distributor, services the control protocol with priority over inbound
 * data, and coordinates resize/stop across lane generations.
 *
 * `Dmux<M>` itself is a thin, thread-safe handle — `control_tx`/`response_rx`
 * for the control protocol, plus a condvar-backed `Termination` latch (the
 * same `Mutex` + `Condvar` shape as `lane::LifecycleHandle`, holding a
 * one-shot `Result` instead of a countdown). The actual fan-out loop runs
 * on a dedicated `dmux-dispatch` thread spawned by `connect`.
 */
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender};

use crate::breaker::{BreakerConfig, MonitorEvent, SignalRegistry};
use crate::config::DmuxConfig;
use crate::control::{ControlKind, ControlMessage, ControlStatus, ResponseMessage};
use crate::distributor::Distributor;
use crate::error::{describe_panic, DmuxError};
use crate::lane::{self, LaneSet};
use crate::traits::{Sink, Source};

/// Condvar-backed one-shot latch carrying the dispatcher's terminal outcome.
///
/// `Ok(())` is a graceful `stop()`; `Err` is a fatal crash in a source or
/// sink thread. Cached as `Arc<DmuxError>` (rather than `DmuxError` itself)
/// so `join()`/`await_termination()` can be called more than once and from
/// more than one thread without requiring `DmuxError: Clone`.
struct Termination {
    state: Mutex<Option<Result<(), Arc<DmuxError>>>>,
    condvar: Condvar,
}

impl Termination {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    fn finish(&self, outcome: Result<(), DmuxError>) {
        let mut state = self.state.lock().expect("termination mutex poisoned");
        if state.is_none() {
            *state = Some(outcome.map_err(Arc::new));
            self.condvar.notify_all();
        }
    }

    fn join(&self) -> Result<(), Arc<DmuxError>> {
        let guard = self.state.lock().expect("termination mutex poisoned");
        let guard = self
            .condvar
            .wait_while(guard, |s| s.is_none())
            .expect("termination mutex poisoned");
        guard.clone().expect("state set before notify")
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), Arc<DmuxError>>> {
        let guard = self.state.lock().expect("termination mutex poisoned");
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |s| s.is_none())
            .expect("termination mutex poisoned");
        guard.clone()
    }
}

/**
 * A running demultiplexing pipeline: one source, one sink (cloned per
 * lane), and a pool of lane workers fed by a pluggable distributor.
 *
 * `Dmux<M>` is instance-scoped — there is no process-wide singleton.
 * Multiple instances, each dispatching a different message type or wired
 * to different sources/sinks, coexist without coupling.
 *
 * Dropping a `Dmux` without calling `stop()` leaves its background threads
 * running; `stop()` is the only sanctioned teardown path, matching the
 * explicit control protocol this type implements rather than an
 * implicit `Drop`-triggered shutdown.
 */
pub struct Dmux<M> {
    control_tx: Sender<ControlMessage>,
    response_rx: Receiver<ResponseMessage>,
    /// Serializes concurrent callers of `resize`/`stop` (protocol misuse
    /// guard) and doubles as the "has stop already succeeded" flag.
    control_lock: Mutex<bool>,
    termination: Arc<Termination>,
    dispatch_handle: Mutex<Option<thread::JoinHandle<()>>>,
    source_handle: Mutex<Option<thread::JoinHandle<()>>>,
    _marker: std::marker::PhantomData<M>,
}

impl<M: Send + 'static> Dmux<M> {
    /**
     * Starts the dispatcher as a background thread and returns immediately
     * with a handle:
     * 1. Initializes the sink's circuit breaker and starts its monitor thread.
     * 2. Builds the first lane generation via `lane::setup`.
     * 3. Creates the inbound channel and spawns the source's `generate`.
     * 4. Spawns the `dmux-dispatch` thread running the fan-out loop.
     */
    pub fn connect<S, D>(
        config: DmuxConfig,
        source: Arc<dyn Source<M>>,
        sink: S,
        distributor: D,
    ) -> Result<Self, DmuxError>
    where
        S: Sink<M>,
        D: Distributor<M>,
    {
        if config.size == 0 {
            return Err(DmuxError::ProtocolMisuse("DmuxConfig.size must be >= 1"));
        }

        sink.init_breaker();
        let breaker = sink.breaker().clone();
        let (monitor_tx, monitor_rx) = unbounded::<MonitorEvent>();
        let signal_registry: SignalRegistry = Arc::new(Mutex::new(Vec::new()));
        let _breaker_monitor = breaker.spawn_monitor(monitor_rx, signal_registry.clone(), BreakerConfig::default())?;

        let (fatal_tx, fatal_rx) = unbounded::<String>();

        let lanes = lane::setup(
            config.size,
            config.sink_q_size,
            config.batch_size,
            config.version,
            config.is_simple_mode(),
            &sink,
            &monitor_tx,
            &fatal_tx,
        )?;
        {
            let mut registry = signal_registry.lock().expect("signal registry poisoned");
            *registry = lanes.signal_txs.clone();
        }

        let (inbound_tx, inbound_rx) = bounded::<M>(config.source_q_size);
        let (control_tx, control_rx) = bounded::<ControlMessage>(0);
        let (response_tx, response_rx) = bounded::<ResponseMessage>(0);
        let termination = Arc::new(Termination::new());

        let source_handle = {
            let source = Arc::clone(&source);
            let fatal_tx = fatal_tx.clone();
            thread::Builder::new().name("dmux-source".into()).spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    source.generate(inbound_tx);
                }));
                if let Err(payload) = result {
                    let _ = fatal_tx.try_send(format!(
                        "source panicked: {}\n{}",
                        describe_panic(payload.as_ref()),
                        crate::error::capture_backtrace()
                    ));
                }
            })?
        };

        let dispatch_handle = {
            let termination = termination.clone();
            thread::Builder::new().name("dmux-dispatch".into()).spawn(move || {
                let outcome = dispatch_loop(DispatchState {
                    lanes,
                    config,
                    inbound_rx,
                    control_rx,
                    response_tx,
                    fatal_tx,
                    fatal_rx,
                    distributor,
                    sink,
                    source,
                    monitor_tx,
                    signal_registry,
                });
                termination.finish(outcome);
            })?
        };

        Ok(Self {
            control_tx,
            response_rx,
            control_lock: Mutex::new(false),
            termination,
            dispatch_handle: Mutex::new(Some(dispatch_handle)),
            source_handle: Mutex::new(Some(source_handle)),
            _marker: std::marker::PhantomData,
        })
    }

    /// Tears down the current lane generation and brings up `new_size`
    /// fresh lanes. Blocks until the swap completes. Cycles the lane set
    /// even when `new_size` equals the current size.
    pub fn resize(&self, new_size: usize) -> Result<(), DmuxError> {
        if new_size == 0 {
            return Err(DmuxError::ProtocolMisuse("resize requires a size >= 1"));
        }
        let response = self.send_control(ControlMessage::Resize(new_size))?;
        match response.status {
            ControlStatus::Success => Ok(()),
            ControlStatus::Failed => Err(DmuxError::ProtocolMisuse("dispatcher rejected resize")),
        }
    }

    /// Requests graceful shutdown: the source is told to stop, all lanes
    /// are drained, and the dispatcher exits. Blocks until the dispatcher
    /// and source threads have both been joined.
    pub fn stop(&self) -> Result<(), DmuxError> {
        let response = self.send_control(ControlMessage::Stop)?;
        if let Some(handle) = self.dispatch_handle.lock().expect("dispatch handle poisoned").take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.source_handle.lock().expect("source handle poisoned").take() {
            let _ = handle.join();
        }
        match response.status {
            ControlStatus::Success => Ok(()),
            ControlStatus::Failed => Err(DmuxError::ProtocolMisuse("dispatcher rejected stop")),
        }
    }

    /// Blocks up to `timeout` for the dispatcher's terminal outcome.
    /// Returns `None` on timeout, `Some(Ok(()))` on graceful stop, or
    /// `Some(Err(..))` if a source/sink thread panicked.
    pub fn await_termination(&self, timeout: Duration) -> Option<Result<(), Arc<DmuxError>>> {
        self.termination.wait_timeout(timeout)
    }

    /// Blocks indefinitely for the dispatcher's terminal outcome.
    pub fn join(&self) -> Result<(), Arc<DmuxError>> {
        self.termination.join()
    }

    fn send_control(&self, msg: ControlMessage) -> Result<ResponseMessage, DmuxError> {
        let mut stopped = self.control_lock.lock().expect("control mutex poisoned");
        if *stopped {
            return Err(DmuxError::ProtocolMisuse("dmux already stopped"));
        }
        let is_stop = matches!(msg, ControlMessage::Stop);
        self.control_tx
            .send(msg)
            .map_err(|_| DmuxError::ProtocolMisuse("dispatcher is no longer accepting control messages"))?;
        let response = self
            .response_rx
            .recv()
            .map_err(|_| DmuxError::ProtocolMisuse("dispatcher exited before acknowledging control message"))?;
        if is_stop {
            *stopped = true;
        }
        Ok(response)
    }
}

/// Bundles everything the dispatch loop closes over — one struct instead
/// of a dozen positional arguments, since every field is moved into the
/// `dmux-dispatch` thread together.
struct DispatchState<M, S, D> {
    lanes: LaneSet<M>,
    config: DmuxConfig,
    inbound_rx: Receiver<M>,
    control_rx: Receiver<ControlMessage>,
    response_tx: Sender<ResponseMessage>,
    fatal_tx: Sender<String>,
    fatal_rx: Receiver<String>,
    distributor: D,
    sink: S,
    source: Arc<dyn Source<M>>,
    monitor_tx: Sender<MonitorEvent>,
    signal_registry: SignalRegistry,
}

fn dispatch_loop<M, S, D>(mut st: DispatchState<M, S, D>) -> Result<(), DmuxError>
where
    M: Send + 'static,
    S: Sink<M>,
    D: Distributor<M>,
{
    let mut inbound_alive = true;

    loop {
        // A non-blocking pre-check before the blocking select bounds
        // stop()/resize() latency under sustained inbound load, giving
        // the control plane priority over data.
        if let Ok(msg) = st.control_rx.try_recv() {
            match handle_control(msg, &mut st)? {
                ControlOutcome::Continue => continue,
                ControlOutcome::Stopped => return Ok(()),
            }
        }

        if let Ok(message) = st.fatal_rx.try_recv() {
            return fatal_shutdown(&mut st, message);
        }

        let mut sel = Select::new();
        let control_idx = sel.recv(&st.control_rx);
        let fatal_idx = sel.recv(&st.fatal_rx);
        let inbound_idx = if inbound_alive { Some(sel.recv(&st.inbound_rx)) } else { None };
        let oper = sel.select();
        let op_index = oper.index();

        if op_index == control_idx {
            match oper.recv(&st.control_rx) {
                Ok(msg) => match handle_control(msg, &mut st)? {
                    ControlOutcome::Continue => continue,
                    ControlOutcome::Stopped => return Ok(()),
                },
                Err(_) => continue,
            }
        } else if op_index == fatal_idx {
            match oper.recv(&st.fatal_rx) {
                Ok(message) => return fatal_shutdown(&mut st, message),
                Err(_) => continue,
            }
        } else if inbound_idx == Some(op_index) {
            match oper.recv(&st.inbound_rx) {
                Ok(message) => {
                    let lane_count = st.lanes.senders.len();
                    let lane_index = st.distributor.distribute(&message, lane_count);
                    if st.lanes.senders[lane_index].send(message).is_err() {
                        let reason = format!("lane {lane_index} channel disconnected unexpectedly");
                        return fatal_shutdown(&mut st, reason);
                    }
                }
                Err(_) => {
                    // The source finished `generate` (or was caught
                    // mid-panic-report) and dropped its sender; nothing
                    // more will ever arrive on `inbound`. Keep servicing
                    // control/fatal only from here on rather than busy-
                    // looping on a permanently-disconnected receiver.
                    inbound_alive = false;
                }
            }
        } else {
            unreachable!("select returned an unregistered operation");
        }
    }
}

enum ControlOutcome {
    Continue,
    Stopped,
}

fn handle_control<M, S, D>(msg: ControlMessage, st: &mut DispatchState<M, S, D>) -> Result<ControlOutcome, DmuxError>
where
    M: Send + 'static,
    S: Sink<M>,
    D: Distributor<M>,
{
    match msg {
        ControlMessage::Resize(new_size) => {
            if new_size == 0 {
                let _ = st.response_tx.send(ResponseMessage {
                    kind: ControlKind::Resize,
                    status: ControlStatus::Failed,
                });
                return Ok(ControlOutcome::Continue);
            }

            let old_lanes = std::mem::replace(&mut st.lanes, LaneSet::empty());
            lane::shutdown(old_lanes);

            st.config.size = new_size;
            let new_lanes = lane::setup(
                st.config.size,
                st.config.sink_q_size,
                st.config.batch_size,
                st.config.version,
                st.config.is_simple_mode(),
                &st.sink,
                &st.monitor_tx,
                &st.fatal_tx,
            )?;
            {
                let mut registry = st.signal_registry.lock().expect("signal registry poisoned");
                *registry = new_lanes.signal_txs.clone();
            }
            st.lanes = new_lanes;

            let _ = st.response_tx.send(ResponseMessage {
                kind: ControlKind::Resize,
                status: ControlStatus::Success,
            });
            Ok(ControlOutcome::Continue)
        }
        ControlMessage::Stop => {
            st.source.stop();
            let old_lanes = std::mem::replace(&mut st.lanes, LaneSet::empty());
            lane::shutdown(old_lanes);
            let _ = st.response_tx.send(ResponseMessage {
                kind: ControlKind::Stop,
                status: ControlStatus::Success,
            });
            Ok(ControlOutcome::Stopped)
        }
    }
}

/// Invoked when a source or sink thread reports a caught panic on the
/// fatal channel. Tears down exactly like a `Stop`, but the terminal
/// outcome is `Err(DmuxError::Fatal)` instead of `Ok(())`, and no response
/// is sent (no control message was ever submitted for this path).
fn fatal_shutdown<M, S, D>(st: &mut DispatchState<M, S, D>, message: String) -> Result<(), DmuxError>
where
    M: Send + 'static,
{
    st.source.stop();
    let old_lanes = std::mem::replace(&mut st.lanes, LaneSet::empty());
    lane::shutdown(old_lanes);
    Err(DmuxError::Fatal(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{Breaker, BreakerState};
    use crate::distributor::{HashDistributor, RoundRobinDistributor};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Source that emits a fixed range of `u64`s, honoring `stop()` via an
    /// atomic flag checked between sends — the pattern `traits::Source`'s
    /// docs call out as the expected shape for interior stop state.
    struct RangeSource {
        count: u64,
        stop_flag: Arc<AtomicBool>,
    }

    impl Source<u64> for RangeSource {
        fn generate(&self, out: Sender<u64>) {
            for i in 0..self.count {
                if self.stop_flag.load(Ordering::Acquire) {
                    return;
                }
                if out.send(i).is_err() {
                    return;
                }
            }
        }
        fn stop(&self) {
            self.stop_flag.store(true, Ordering::Release);
        }
    }

    fn range_source(count: u64) -> Arc<dyn Source<u64>> {
        Arc::new(RangeSource {
            count,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Sink that records every message it receives (tagged with a
    /// lane-clone id assigned at `clone()` time) into a shared log, always
    /// reporting `Success`.
    struct RecordingSink {
        breaker: Breaker,
        log: Arc<StdMutex<Vec<(usize, u64)>>>,
        next_clone_id: Arc<AtomicUsize>,
        clone_id: usize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                breaker: Breaker::new(),
                log: Arc::new(StdMutex::new(Vec::new())),
                next_clone_id: Arc::new(AtomicUsize::new(0)),
                clone_id: 0,
            }
        }
    }

    impl std::clone::Clone for RecordingSink {
        fn clone(&self) -> Self {
            Self {
                breaker: self.breaker.clone(),
                log: self.log.clone(),
                next_clone_id: self.next_clone_id.clone(),
                clone_id: self.next_clone_id.fetch_add(1, Ordering::Relaxed) + 1,
            }
        }
    }

    impl Sink<u64> for RecordingSink {
        fn consume(&self, msg: u64, _breaker_signal: &Receiver<BreakerState>, monitor: &Sender<MonitorEvent>) {
            self.log.lock().unwrap().push((self.clone_id, msg));
            let _ = monitor.try_send(MonitorEvent::Success);
        }
        fn batch_consume(
            &self,
            batch: Vec<u64>,
            _version: u32,
            _breaker_signal: &Receiver<BreakerState>,
            monitor: &Sender<MonitorEvent>,
        ) {
            let mut log = self.log.lock().unwrap();
            for msg in batch {
                log.push((self.clone_id, msg));
            }
            let _ = monitor.try_send(MonitorEvent::Success);
        }
        fn breaker(&self) -> &Breaker {
            &self.breaker
        }
    }

    fn always_fail_sink() -> FailingSink {
        FailingSink { breaker: Breaker::new() }
    }

    #[derive(Clone)]
    struct FailingSink {
        breaker: Breaker,
    }

    impl Sink<u64> for FailingSink {
        fn consume(&self, msg: u64, _breaker_signal: &Receiver<BreakerState>, monitor: &Sender<MonitorEvent>) {
            let _ = msg;
            let _ = monitor.try_send(MonitorEvent::Failed);
        }
        fn batch_consume(
            &self,
            _batch: Vec<u64>,
            _version: u32,
            _breaker_signal: &Receiver<BreakerState>,
            monitor: &Sender<MonitorEvent>,
        ) {
            let _ = monitor.try_send(MonitorEvent::Failed);
        }
        fn breaker(&self) -> &Breaker {
            &self.breaker
        }
    }

    #[test]
    fn simple_fan_out_preserves_per_lane_order() {
        let sink = RecordingSink::new();
        let log = sink.log.clone();
        let config = DmuxConfig {
            size: 4,
            source_q_size: 1,
            sink_q_size: 10,
            batch_size: 1,
            version: 1,
        };
        let distributor = HashDistributor::new(|m: &u64| *m % 4);
        let dmux = Dmux::connect(config, range_source(1000), sink, distributor).unwrap();
        dmux.stop().unwrap();
        dmux.join().unwrap();

        let mut per_lane_key: HashMap<u64, Vec<u64>> = HashMap::new();
        for (_, msg) in log.lock().unwrap().iter().copied() {
            per_lane_key.entry(msg % 4).or_default().push(msg);
        }
        for key in 0..4u64 {
            let values = &per_lane_key[&key];
            assert_eq!(values.len(), 250);
            let mut sorted = values.clone();
            sorted.sort_unstable();
            assert_eq!(*values, sorted, "messages with equal key must stay in emission order");
        }
    }

    #[test]
    fn batched_fan_out_groups_by_sibling_channel() {
        let sink = RecordingSink::new();
        let log = sink.log.clone();
        let config = DmuxConfig {
            size: 2,
            source_q_size: 1,
            sink_q_size: 4,
            batch_size: 3,
            version: 2,
        };
        // Keys cycle A,B,C mod 6 so that, with 2 workers * 3 siblings = 6
        // channels, each key always lands on the same sibling slot.
        let distributor = HashDistributor::new(|m: &u64| *m % 6);
        let dmux = Dmux::connect(config, range_source(60), sink, distributor).unwrap();
        dmux.stop().unwrap();
        dmux.join().unwrap();

        assert_eq!(log.lock().unwrap().len(), 60);
    }

    #[test]
    fn resize_cycles_lanes_without_losing_messages() {
        let sink = RecordingSink::new();
        let log = sink.log.clone();
        let config = DmuxConfig::with_size(2);
        let distributor = RoundRobinDistributor::new();
        let dmux = Dmux::connect(config, range_source(2000), sink, distributor).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        dmux.resize(8).unwrap();
        dmux.stop().unwrap();
        dmux.join().unwrap();

        assert_eq!(log.lock().unwrap().len(), 2000);
    }

    /// Forwards messages pushed in from the test thread, so the test can
    /// control exactly how many messages land before and after a `resize`.
    struct RelaySource {
        user_rx: Receiver<u64>,
        stop_flag: Arc<AtomicBool>,
    }

    impl Source<u64> for RelaySource {
        fn generate(&self, out: Sender<u64>) {
            loop {
                if self.stop_flag.load(Ordering::Acquire) {
                    return;
                }
                match self.user_rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(msg) => {
                        if out.send(msg).is_err() {
                            return;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                }
            }
        }
        fn stop(&self) {
            self.stop_flag.store(true, Ordering::Release);
        }
    }

    #[test]
    fn round_robin_redistributes_after_resize() {
        let sink = RecordingSink::new();
        let log = sink.log.clone();
        let (user_tx, user_rx) = unbounded::<u64>();
        let source: Arc<dyn Source<u64>> = Arc::new(RelaySource {
            user_rx,
            stop_flag: Arc::new(AtomicBool::new(false)),
        });
        let config = DmuxConfig::with_size(3);
        let distributor = RoundRobinDistributor::new();
        let dmux = Dmux::connect(config, source, sink, distributor).unwrap();

        for i in 0..9u64 {
            user_tx.send(i).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        dmux.resize(2).unwrap();
        for i in 9..18u64 {
            user_tx.send(i).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        drop(user_tx);
        dmux.stop().unwrap();
        dmux.join().unwrap();

        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 18);
        let mut per_clone: HashMap<usize, usize> = HashMap::new();
        for (clone_id, _) in entries.iter() {
            *per_clone.entry(*clone_id).or_default() += 1;
        }
        // 3 lanes before the resize, 2 after: every message lands on some
        // lane clone, and more than one clone is ever exercised (ordering
        // across keys is explicitly not guaranteed for round-robin).
        assert!(per_clone.len() >= 2);
    }

    #[test]
    fn stop_returns_ok_and_drains_source() {
        let sink = RecordingSink::new();
        let log = sink.log.clone();
        let config = DmuxConfig::with_size(3);
        let distributor = RoundRobinDistributor::new();
        let dmux = Dmux::connect(config, range_source(500), sink, distributor).unwrap();

        // `stop()` only guarantees source.stop() was honored and whatever
        // had already reached a lane is drained — not that the source
        // finished emitting first. Wait for every message to actually land
        // in the sink before calling stop(), so this test exercises
        // stop()'s own contract (bounded return, Ok(())) rather than racing
        // it against the source/dispatcher scheduling.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if log.lock().unwrap().len() == 500 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "messages did not finish draining in time");
            std::thread::sleep(Duration::from_millis(5));
        }

        dmux.stop().unwrap();
        let outcome = dmux.join();
        assert!(outcome.is_ok());
        assert_eq!(log.lock().unwrap().len(), 500);
    }

    #[test]
    fn breaker_trip_sheds_load_without_invoking_sink_after_open() {
        let sink = always_fail_sink();
        let config = DmuxConfig::with_size(1);
        let distributor = RoundRobinDistributor::new();
        let dmux = Dmux::connect(config, range_source(200), sink, distributor).unwrap();
        // Give the breaker's monitor thread time to trip and the source
        // time to finish emitting; either way `stop()` must still return.
        std::thread::sleep(Duration::from_millis(50));
        dmux.stop().unwrap();
        dmux.join().unwrap();
    }

    #[test]
    fn resize_to_zero_is_rejected_without_touching_lanes() {
        let sink = RecordingSink::new();
        let config = DmuxConfig::with_size(2);
        let distributor = RoundRobinDistributor::new();
        let dmux = Dmux::connect(config, range_source(10), sink, distributor).unwrap();
        assert!(matches!(dmux.resize(0), Err(DmuxError::ProtocolMisuse(_))));
        dmux.stop().unwrap();
        dmux.join().unwrap();
    }

    #[test]
    fn second_stop_after_success_is_protocol_misuse() {
        let sink = RecordingSink::new();
        let config = DmuxConfig::with_size(1);
        let distributor = RoundRobinDistributor::new();
        let dmux = Dmux::connect(config, range_source(5), sink, distributor).unwrap();
        dmux.stop().unwrap();
        assert!(matches!(dmux.stop(), Err(DmuxError::ProtocolMisuse(_))));
    }
}
