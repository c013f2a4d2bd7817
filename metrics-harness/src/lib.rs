//! A micro-benchmark harness for metric registries.
//!
//! The harness measures the cost of the hot-path operations of a metric registry: resolving a
//! counter or histogram by name and tags, incrementing a counter and recording a sample.  Every
//! registry is driven through the same [`RegistryAdapter`] interface, so numbers for different
//! implementations are directly comparable.
//!
//! # Pieces
//! - [`workload`] pre-computes seeded sample buffers so that no random numbers are drawn while
//!   measuring.
//! - [`registry`] holds a sharded, lock-light registry generic over its [`storage::Storage`].  The
//!   `atomic` and `striped` reference adapters are built on it, and so is the pull-model
//!   [`prometheus`] adapter, which can also render its contents in the text exposition format.
//! - [`driver`] runs a [`Trial`]: worker threads walk through warm-up, measurement and teardown,
//!   recording one [`TimingRecord`] per batch of operations.
//! - [`stats`] turns timings into a [`LatencySummary`] and compares trials against a baseline;
//!   [`report`] prints the results as a table or JSON.
//! - [`reporter`] periodically logs every meter of a registry under hierarchical names while a
//!   trial is running.
//!
//! # Example
//!
//! ```
//! use metrics_harness::{AdapterKind, Benchmark, IterationMode, SuiteReport, Trial, TrialConfig};
//!
//! let config = TrialConfig {
//!     threads: 2,
//!     iteration: IterationMode::Operations { batches: 10 },
//!     batch_size: 100,
//!     buffer_len: 1024,
//!     ..Default::default()
//! };
//! let result = Trial::new(Benchmark::Counter, config).run(&AdapterKind::Striped);
//! assert!(result.is_completed());
//!
//! println!("{}", SuiteReport::new(&[result], None));
//! ```

mod adapter;
pub use self::adapter::{AdapterFactory, AdapterKind, RegistryAdapter};

mod config;
pub use self::config::{Benchmark, IterationMode, TrialConfig, WarmupAccounting, DEFAULT_SPREAD};

pub mod driver;
pub use self::driver::{Phase, Suite, TimingRecord, Trial, TrialFailure, TrialResult, TrialStatus};

mod error;
pub use self::error::{
    AdapterInitError, AggregationError, ConfigurationError, HarnessError, WorkerFailure,
};

mod handles;
pub use self::handles::{Counter, CounterFn, DistributionSnapshot, Histogram, HistogramFn};

mod meter;
pub use self::meter::{Measurement, Meter, MeterVisitor};

mod name;
pub use self::name::{MetricName, Tag};

mod probe;
pub use self::probe::{NoopProbe, RuntimeProbe, RuntimeSample};

pub mod prometheus;

mod quantile;
pub use self::quantile::{parse_quantiles, Quantile};

pub mod registry;

pub mod report;
pub use self::report::SuiteReport;

pub mod reporter;

pub mod stats;
pub use self::stats::LatencySummary;

pub mod storage;

pub mod workload;
