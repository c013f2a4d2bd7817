//! Error types surfaced by the harness.
use std::time::Duration;

use thiserror::Error as ThisError;

/// Invalid input detected before any worker thread starts.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum ConfigurationError {
    /// A metric name was empty.
    #[error("metric name cannot be empty")]
    EmptyName,

    /// A tag key was empty.
    #[error("tag key cannot be empty (metric `{name}`)")]
    EmptyTagKey { name: String },

    /// The same tag key appeared more than once.
    #[error("duplicate tag key `{key}` (metric `{name}`)")]
    DuplicateTag { name: String, key: String },

    /// A flat key/value tag list did not have an even number of entries.
    #[error("tag list for metric `{name}` has {len} entries, expected key/value pairs")]
    OddTagPairs { name: String, len: usize },

    /// The worker thread count was zero.
    #[error("thread count must be at least 1")]
    InvalidThreadCount,

    /// The batch size was zero.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    /// No measurement iterations were requested.
    #[error("measurement iterations must be at least 1")]
    ZeroMeasurementIterations,

    /// An iteration was configured with no batches or no duration.
    #[error("iteration must run at least one batch")]
    EmptyIteration,

    /// The workload would produce no samples.
    #[error("workload buffer cannot be empty")]
    EmptyWorkload,

    /// A counter fan-out of zero counters.
    #[error("counter fan-out must be at least 1")]
    InvalidFanOut,

    /// The trial deadline was zero.
    #[error("trial timeout must be non-zero")]
    ZeroTimeout,

    /// A reservoir was configured with no capacity.
    #[error("reservoir capacity must be at least 1")]
    InvalidReservoirCapacity,

    /// A sliding window was configured with a zero duration.
    #[error("sliding window must be non-zero")]
    InvalidWindow,

    /// Histogram bucket bounds were empty, unsorted or not finite.
    #[error("histogram buckets must be non-empty, finite and strictly increasing")]
    InvalidBuckets,

    /// The relative accuracy of a summary sketch was outside `(0, 1)`.
    #[error("summary accuracy must be within (0, 1), got {0}")]
    InvalidSketchAccuracy(f64),

    /// A quantile or confidence level was outside `[0, 1]`.
    #[error("quantile/confidence must be within [0, 1], got {0}")]
    InvalidQuantile(f64),

    /// The adapter does not implement the requested histogram policy.
    #[error("adapter `{adapter}` does not support the `{policy}` histogram policy")]
    UnsupportedPolicy { adapter: &'static str, policy: &'static str },

    /// An adapter name was not recognised.
    #[error("unknown adapter `{0}`")]
    UnknownAdapter(String),

    /// A benchmark name was not recognised.
    #[error("unknown benchmark `{0}`")]
    UnknownBenchmark(String),
}

/// Failure to construct a registry adapter.
#[derive(Clone, Debug, PartialEq, ThisError)]
#[error("adapter `{adapter}` failed to initialize: {reason}")]
pub struct AdapterInitError {
    pub adapter: String,
    pub reason: String,
}

impl AdapterInitError {
    /// Creates a new `AdapterInitError`.
    pub fn new<A: Into<String>, R: Into<String>>(adapter: A, reason: R) -> Self {
        Self { adapter: adapter.into(), reason: reason.into() }
    }
}

/// A fault raised inside a worker's operation loop.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum WorkerFailure {
    /// An operation returned an error.
    #[error("worker {worker} failed: {cause}")]
    Operation { worker: usize, cause: ConfigurationError },

    /// A worker panicked.
    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: usize, message: String },

    /// The trial ran past its wall-clock cap.
    #[error("worker {worker} found the trial past its {limit:?} time limit")]
    TimedOut { worker: usize, limit: Duration },
}

/// Not enough data to compute statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum AggregationError {
    /// The timing sequence was empty.
    #[error("no data")]
    NoData,
}

/// Any error produced while running a trial.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    AdapterInit(#[from] AdapterInitError),

    #[error(transparent)]
    Worker(#[from] WorkerFailure),

    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),
}
