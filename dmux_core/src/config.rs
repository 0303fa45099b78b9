/*!
 * Dispatcher configuration.
 *
 * `DmuxConfig` is consumed once, at `Dmux::connect()` time, to size the
 * lane pool and its channels. It is plain, serde-deserializable data —
 * no behaviour lives here.
 */
use serde::{Deserialize, Serialize};

const DEFAULT_SOURCE_Q_SIZE: usize = 1;
const DEFAULT_SINK_Q_SIZE: usize = 100;
const DEFAULT_BATCH_SIZE: usize = 1;
const DEFAULT_VERSION: u32 = 1;

/**
 * Configuration parameters for a `Dmux` instance.
 *
 * `size` is the only field without a default, since a lane count of zero
 * is meaningless. Every other field falls back to a sensible default when
 * absent from the source JSON (`#[serde(default = ...)]` below), rather
 * than requiring a caller to spell out the whole struct for the common
 * case.
 *
 * # Example
 * ```ignore
 * let conf: DmuxConfig = serde_json::from_str(r#"{"size": 4}"#)?;
 * assert_eq!(conf.sink_q_size, 100);
 * ```
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DmuxConfig {
    /// Number of lanes (logical worker count). Must be ≥ 1.
    pub size: usize,

    /// Bounded capacity of the inbound channel between source and dispatcher.
    #[serde(default = "default_source_q_size")]
    pub source_q_size: usize,

    /// Bounded capacity of each lane channel.
    #[serde(default = "default_sink_q_size")]
    pub sink_q_size: usize,

    /// Number of messages a lane worker batches per `batch_consume` flush.
    /// `1` selects simple (non-batched) mode when combined with `version == 1`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Opaque version passed through to `Sink::batch_consume`, selecting
    /// the sink's batching contract. Any value other than `1` forces
    /// batched-mode lane workers even if `batch_size == 1`.
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_source_q_size() -> usize {
    DEFAULT_SOURCE_Q_SIZE
}

fn default_sink_q_size() -> usize {
    DEFAULT_SINK_Q_SIZE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_version() -> u32 {
    DEFAULT_VERSION
}

impl DmuxConfig {
    /**
     * Builds a config with only `size` set, everything else defaulted.
     * Equivalent to `DmuxConfig { size, ..Default::default() }` but
     * reads better at call sites that only care about lane count.
     */
    pub fn with_size(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /**
     * `true` when lane workers should run in simple (non-batched) mode,
     * i.e. `batch_size == 1 && version == 1`.
     */
    pub fn is_simple_mode(&self) -> bool {
        self.batch_size == 1 && self.version == 1
    }
}

impl Default for DmuxConfig {
    fn default() -> Self {
        Self {
            size: 1,
            source_q_size: DEFAULT_SOURCE_Q_SIZE,
            sink_q_size: DEFAULT_SINK_Q_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            version: DEFAULT_VERSION,
        }
    }
}
