/*!
 * Lane setup/teardown and the two lane-worker loops (simple and batched).
 *
 * The batched worker below uses `crossbeam_channel::Select` to block
 * fairly across its sibling channels and the breaker signal, rather than
 * a non-blocking default arm that would spin the thread.
 */
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Select, Sender};

use crate::breaker::{BreakerState, MonitorEvent};
use crate::traits::Sink;

/**
 * Condvar-backed completion latch: shutdown/resize blocks in `wait()`
 * until every lane worker has called `done()` once.
 *
 * A `Mutex` guarding a plain counter plus a `Condvar` — a one-shot flush
 * signal generalized into a countdown so it can wait on an arbitrary
 * number of workers instead of just one.
 */
pub struct LifecycleHandle {
    remaining: Mutex<usize>,
    condvar: Condvar,
}

impl LifecycleHandle {
    fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    /// Called by a worker thread exactly once, when it exits.
    pub fn done(&self) {
        let mut remaining = self.remaining.lock().expect("lifecycle mutex poisoned");
        if *remaining > 0 {
            *remaining -= 1;
        }
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }

    /// Blocks until every registered worker has called `done()`.
    pub fn wait(&self) {
        let guard = self.remaining.lock().expect("lifecycle mutex poisoned");
        let _ = self
            .condvar
            .wait_while(guard, |remaining| *remaining > 0)
            .expect("lifecycle mutex poisoned");
    }
}

/// Everything the dispatcher needs to hold onto for a live lane set.
pub struct LaneSet<M> {
    /// Data channels the dispatcher's distributor indexes into. Length is
    /// `size` in simple mode, `size * batch_size` in batched mode.
    pub senders: Vec<Sender<M>>,
    /// Latch the dispatcher waits on during `shutdown`.
    pub lifecycle: Arc<LifecycleHandle>,
    /// Handles to the spawned worker threads, joined after `lifecycle.wait()`
    /// returns, so `shutdown` never returns while a worker thread is still
    /// unwinding its stack.
    pub workers: Vec<thread::JoinHandle<()>>,
    /// One breaker-signal sender per worker (`size` of them, in both
    /// modes) — the dispatcher hands these to `Breaker::spawn_monitor` so
    /// the breaker thread can broadcast state transitions to every lane.
    pub signal_txs: Vec<Sender<BreakerState>>,
}

impl<M> LaneSet<M> {
    /// A lane set with no channels and no workers. `shutdown` on this
    /// returns immediately (the lifecycle latch is already at zero) — used
    /// as a transient placeholder while the dispatcher swaps generations
    /// during `resize`.
    pub(crate) fn empty() -> Self {
        Self {
            senders: Vec::new(),
            lifecycle: Arc::new(LifecycleHandle::new(0)),
            workers: Vec::new(),
            signal_txs: Vec::new(),
        }
    }
}

/**
 * Creates the lane channel layout and spawns worker threads for one
 * generation of lanes, choosing simple or batched mode.
 *
 * `fatal_tx` is shared by every worker thread spawned here: a sink panic
 * caught at the worker's `catch_unwind` boundary is reported on it instead
 * of unwinding into the thread's `JoinHandle`, turning a panic into a
 * reportable event rather than letting it propagate raw.
 */
pub fn setup<M, S>(
    size: usize,
    sink_q_size: usize,
    batch_size: usize,
    version: u32,
    is_simple_mode: bool,
    sink: &S,
    monitor_tx: &Sender<MonitorEvent>,
    fatal_tx: &Sender<String>,
) -> std::io::Result<LaneSet<M>>
where
    M: Send + 'static,
    S: Sink<M>,
{
    if is_simple_mode {
        simple_setup(size, sink_q_size, sink, monitor_tx, fatal_tx)
    } else {
        batched_setup(size, sink_q_size, batch_size, version, sink, monitor_tx, fatal_tx)
    }
}

/// Closes every lane channel and blocks until all workers have
/// acknowledged exit, then joins their threads.
pub fn shutdown<M>(lanes: LaneSet<M>) {
    drop(lanes.senders);
    lanes.lifecycle.wait();
    for handle in lanes.workers {
        let _ = handle.join();
    }
}

fn simple_setup<M, S>(
    size: usize,
    sink_q_size: usize,
    sink: &S,
    monitor_tx: &Sender<MonitorEvent>,
    fatal_tx: &Sender<String>,
) -> std::io::Result<LaneSet<M>>
where
    M: Send + 'static,
    S: Sink<M>,
{
    let lifecycle = Arc::new(LifecycleHandle::new(size));
    let mut senders = Vec::with_capacity(size);
    let mut workers = Vec::with_capacity(size);
    let mut signal_txs = Vec::with_capacity(size);
    for index in 0..size {
        let (data_tx, data_rx) = bounded::<M>(sink_q_size);
        let (breaker_tx, breaker_rx) = bounded::<BreakerState>(1);
        let sink_clone = sink.clone();
        let monitor_tx = monitor_tx.clone();
        let fatal_tx = fatal_tx.clone();
        let lifecycle = lifecycle.clone();

        let handle = thread::Builder::new().name(format!("dmux-lane-{index}")).spawn(move || {
            simple_worker_loop(index, data_rx, breaker_rx, sink_clone, monitor_tx, fatal_tx, lifecycle)
        })?;

        senders.push(data_tx);
        signal_txs.push(breaker_tx);
        workers.push(handle);
    }

    Ok(LaneSet {
        senders,
        lifecycle,
        workers,
        signal_txs,
    })
}

fn batched_setup<M, S>(
    size: usize,
    sink_q_size: usize,
    batch_size: usize,
    version: u32,
    sink: &S,
    monitor_tx: &Sender<MonitorEvent>,
    fatal_tx: &Sender<String>,
) -> std::io::Result<LaneSet<M>>
where
    M: Send + 'static,
    S: Sink<M>,
{
    let total_channels = size * batch_size;
    let lifecycle = Arc::new(LifecycleHandle::new(total_channels));
    let mut senders = Vec::with_capacity(total_channels);
    let mut all_receivers = Vec::with_capacity(total_channels);
    for _ in 0..total_channels {
        let (tx, rx) = bounded::<M>(sink_q_size);
        senders.push(tx);
        all_receivers.push(rx);
    }

    let mut workers = Vec::with_capacity(size);
    let mut signal_txs = Vec::with_capacity(size);
    let mut receiver_groups = all_receivers.into_iter();
    for worker_index in 0..size {
        let sibling_rx: Vec<Receiver<M>> = (&mut receiver_groups).take(batch_size).collect();
        let (breaker_tx, breaker_rx) = bounded::<BreakerState>(1);
        let sink_clone = sink.clone();
        let monitor_tx = monitor_tx.clone();
        let fatal_tx = fatal_tx.clone();
        let lifecycle = lifecycle.clone();

        let handle = thread::Builder::new()
            .name(format!("dmux-lane-{worker_index}"))
            .spawn(move || {
                batched_worker_loop(
                    worker_index,
                    sibling_rx,
                    breaker_rx,
                    sink_clone,
                    version,
                    monitor_tx,
                    fatal_tx,
                    lifecycle,
                )
            })?;

        signal_txs.push(breaker_tx);
        workers.push(handle);
    }

    Ok(LaneSet {
        senders,
        lifecycle,
        workers,
        signal_txs,
    })
}

fn simple_worker_loop<M, S>(
    index: usize,
    lane_rx: Receiver<M>,
    breaker_rx: Receiver<BreakerState>,
    sink: S,
    monitor_tx: Sender<MonitorEvent>,
    fatal_tx: Sender<String>,
    lifecycle: Arc<LifecycleHandle>,
) where
    S: Sink<M>,
{
    loop {
        let mut sel = Select::new();
        let breaker_idx = sel.recv(&breaker_rx);
        let msg_idx = sel.recv(&lane_rx);
        let oper = sel.select();

        if oper.index() == breaker_idx {
            if let Ok(BreakerState::HalfOpen) = oper.recv(&breaker_rx) {
                let _ = monitor_tx.try_send(MonitorEvent::NotProcessed);
            }
            continue;
        }

        debug_assert_eq!(oper.index(), msg_idx);
        match oper.recv(&lane_rx) {
            Ok(msg) => {
                let breaker_rx = &breaker_rx;
                let monitor_tx = &monitor_tx;
                let sink = &sink;
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    sink.consume(msg, breaker_rx, monitor_tx)
                }));
                if let Err(payload) = outcome {
                    let _ = fatal_tx.try_send(format!(
                        "lane {index} sink panicked: {}\n{}",
                        crate::error::describe_panic(payload.as_ref()),
                        crate::error::capture_backtrace()
                    ));
                    lifecycle.done();
                    return;
                }
            }
            Err(_) => {
                lifecycle.done();
                return;
            }
        }
    }
}

/// Which batch slot (or the breaker signal) a live `Select` operation index
/// currently refers to.
#[derive(Clone, Copy)]
enum SelTarget {
    Slot(usize),
    Breaker,
}

/// Batched-mode worker: owns `b` sibling channels, fills one batch slot
/// per channel per flush via a fair blocking `Select` rather than
/// polling with a non-blocking default arm (see module docs).
///
/// `Select::remove` swap-removes internally: the operation that was last
/// in the list is reassigned the index being removed. `targets` is kept in
/// lockstep with that via `Vec::swap_remove` at the same index, so
/// `targets[op_index]` is always the right lookup — a linear scan keyed by
/// a remembered "original" index would go stale after the first removal.
fn batched_worker_loop<M, S>(
    index: usize,
    sibling_rx: Vec<Receiver<M>>,
    breaker_rx: Receiver<BreakerState>,
    sink: S,
    version: u32,
    monitor_tx: Sender<MonitorEvent>,
    fatal_tx: Sender<String>,
    lifecycle: Arc<LifecycleHandle>,
) where
    S: Sink<M>,
{
    let b = sibling_rx.len();

    loop {
        let mut batch: Vec<Option<M>> = (0..b).map(|_| None).collect();
        let mut filled = 0usize;
        let mut failed = false;

        let mut sel = Select::new();
        let mut targets: Vec<SelTarget> = Vec::with_capacity(b + 1);
        for (z, rx) in sibling_rx.iter().enumerate() {
            let idx = sel.recv(rx);
            debug_assert_eq!(idx, targets.len());
            targets.push(SelTarget::Slot(z));
        }
        let breaker_idx = sel.recv(&breaker_rx);
        debug_assert_eq!(breaker_idx, targets.len());
        targets.push(SelTarget::Breaker);

        while filled < b {
            let oper = sel.select();
            let op_index = oper.index();

            match targets[op_index] {
                SelTarget::Breaker => {
                    match oper.recv(&breaker_rx) {
                        Ok(BreakerState::HalfOpen) => {
                            let _ = monitor_tx.try_send(MonitorEvent::NotProcessed);
                        }
                        Ok(_) => {}
                        Err(_) => {
                            sel.remove(op_index);
                            targets.swap_remove(op_index);
                        }
                    }
                    continue;
                }
                SelTarget::Slot(z) => match oper.recv(&sibling_rx[z]) {
                    Ok(msg) => {
                        batch[z] = Some(msg);
                        filled += 1;
                        sel.remove(op_index);
                        targets.swap_remove(op_index);
                    }
                    Err(_) => {
                        failed = true;
                        sel.remove(op_index);
                        targets.swap_remove(op_index);
                        break;
                    }
                },
            }
        }

        if failed {
            for _ in 0..b {
                lifecycle.done();
            }
            return;
        }

        let batch: Vec<M> = batch.into_iter().map(|m| m.expect("every slot filled")).collect();
        let breaker_rx_ref = &breaker_rx;
        let monitor_tx_ref = &monitor_tx;
        let sink_ref = &sink;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sink_ref.batch_consume(batch, version, breaker_rx_ref, monitor_tx_ref)
        }));
        if let Err(payload) = outcome {
            let _ = fatal_tx.try_send(format!(
                "lane {index} sink panicked: {}\n{}",
                crate::error::describe_panic(payload.as_ref()),
                crate::error::capture_backtrace()
            ));
            for _ in 0..b {
                lifecycle.done();
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn lifecycle_handle_waits_for_all_done_calls() {
        let handle = Arc::new(LifecycleHandle::new(3));
        let waiter = handle.clone();
        let done_count = Arc::new(AtomicUsize::new(0));
        let dc = done_count.clone();

        let join = thread::spawn(move || {
            waiter.wait();
            assert_eq!(dc.load(Ordering::SeqCst), 3);
        });

        thread::sleep(Duration::from_millis(10));
        handle.done();
        handle.done();
        done_count.store(3, Ordering::SeqCst);
        handle.done();

        join.join().unwrap();
    }
}
