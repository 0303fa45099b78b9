/**
 * Minimal demonstration harness for the dmux engine.
 *
 * Wires an in-memory `Source` (an integer counter) and `Sink` (prints
 * whatever it receives) to `Dmux::connect`, then exercises `resize()` and
 * `stop()` so the control protocol is visible end to end.
 *
 *   cargo run -p dmux_example                  # simple mode, hash distributor
 *   cargo run -p dmux_example -- --batched     # batched mode (batch_size=3)
 *   cargo run -p dmux_example -- --round-robin # round-robin distributor
 */
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use dmux::{
    Breaker, BreakerState, Dmux, DmuxConfig, HashDistributor, MonitorEvent, RoundRobinDistributor, Sink, Source,
};

/// Emits `0..total`, stopping early if `stop()` is called from another
/// thread — the interior-state pattern `Source::stop` documents.
struct CounterSource {
    total: u64,
    stop_flag: Arc<AtomicBool>,
}

impl Source<u64> for CounterSource {
    fn generate(&self, out: Sender<u64>) {
        for i in 0..self.total {
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            if out.send(i).is_err() {
                break;
            }
        }
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

/// Prints every message (or batch) it receives, tagging output with a
/// per-clone id so the fan-out across lanes is visible in the console.
#[derive(Clone)]
struct PrintingSink {
    breaker: Breaker,
    clone_id: Arc<AtomicUsize>,
}

impl PrintingSink {
    fn new() -> Self {
        Self {
            breaker: Breaker::new(),
            clone_id: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Sink<u64> for PrintingSink {
    fn consume(&self, msg: u64, _breaker_signal: &Receiver<BreakerState>, monitor: &Sender<MonitorEvent>) {
        println!("[dmux_example] lane consumed {msg}");
        let _ = monitor.try_send(MonitorEvent::Success);
    }

    fn batch_consume(
        &self,
        batch: Vec<u64>,
        version: u32,
        _breaker_signal: &Receiver<BreakerState>,
        monitor: &Sender<MonitorEvent>,
    ) {
        println!("[dmux_example] lane consumed batch (version {version}): {batch:?}");
        let _ = monitor.try_send(MonitorEvent::Success);
    }

    fn breaker(&self) -> &Breaker {
        &self.breaker
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let batched = args.iter().any(|a| a == "--batched");
    let round_robin = args.iter().any(|a| a == "--round-robin");

    let config = if batched {
        DmuxConfig {
            size: 2,
            batch_size: 3,
            version: 2,
            ..DmuxConfig::with_size(2)
        }
    } else {
        DmuxConfig::with_size(4)
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let source: Arc<dyn Source<u64>> = Arc::new(CounterSource {
        total: 200,
        stop_flag: stop_flag.clone(),
    });
    let sink = PrintingSink::new();

    let dmux = if round_robin {
        println!("[dmux_example] distributor = round-robin");
        Dmux::connect(config, source, sink, RoundRobinDistributor::new())
    } else {
        println!("[dmux_example] distributor = hash(msg % lane_count)");
        Dmux::connect(config, source, sink, HashDistributor::new(|m: &u64| *m))
    }
    .expect("failed to start dmux");

    std::thread::sleep(Duration::from_millis(100));
    println!("[dmux_example] resizing lane pool to 6");
    dmux.resize(6).expect("resize failed");

    std::thread::sleep(Duration::from_millis(100));
    println!("[dmux_example] stopping");
    dmux.stop().expect("stop failed");

    match dmux.join() {
        Ok(()) => println!("[dmux_example] dispatcher exited cleanly"),
        Err(err) => eprintln!("[dmux_example] dispatcher exited with a fatal error: {err}"),
    }
}
