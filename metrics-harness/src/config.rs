//! Trial configuration and benchmark definitions.
use std::{fmt, str::FromStr, time::Duration};

use serde::Serialize;

use crate::{
    error::ConfigurationError,
    quantile::parse_quantiles,
    reporter::ReporterConfig,
    stats::check_confidence,
    storage::HistogramPolicy,
    workload::{DEFAULT_BUFFER_LEN, DEFAULT_SEED},
};

/// Number of counters used by the spread benchmarks when none is given.
pub const DEFAULT_SPREAD: u32 = 64;

/// How long one iteration runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationMode {
    /// Every worker runs exactly this many batches per iteration.
    Operations { batches: u64 },
    /// Every worker runs batches until this much time has passed in the iteration.
    Time(Duration),
}

/// Whether operations issued during warm-up land in the measured registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupAccounting {
    /// Warm-up runs against its own registry instance, so the final snapshot only counts
    /// operations issued while measuring.
    #[default]
    Excluded,
    /// Warm-up and measurement share one registry instance, so the final snapshot counts both.
    Included,
}

/// Settings for one trial.
///
/// Every field has a default; see [`TrialConfig::default`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrialConfig {
    /// Number of worker threads.  Defaults to 16.
    pub threads: usize,
    /// Number of warm-up iterations.  Defaults to 2.
    pub warmup_iterations: usize,
    /// Number of measured iterations.  Defaults to 2.
    pub measurement_iterations: usize,
    /// Length of one iteration.  Defaults to 1,000 batches per worker.
    pub iteration: IterationMode,
    /// Operations per timed batch.  Defaults to 1,000.
    pub batch_size: u64,
    /// Defaults to [`WarmupAccounting::Excluded`].
    pub warmup: WarmupAccounting,
    /// Wall-clock cap for the whole trial.  Defaults to five minutes.
    pub timeout: Duration,
    /// Seed of the workload generators.  Defaults to 1234567891.
    pub seed: u64,
    /// Length of the pre-computed workload buffer.  Defaults to 2^20.
    pub buffer_len: usize,
    /// Quantiles reported for batch latencies.  Defaults to p50 and p99.
    pub quantiles: Vec<f64>,
    /// Confidence level of the mean latency interval.  Defaults to 0.999.
    pub confidence: f64,
    /// Step log reporter run alongside the trial.  Defaults to `None`.
    pub reporter: Option<ReporterConfig>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        TrialConfig {
            threads: 16,
            warmup_iterations: 2,
            measurement_iterations: 2,
            iteration: IterationMode::Operations { batches: 1_000 },
            batch_size: 1_000,
            warmup: WarmupAccounting::Excluded,
            timeout: Duration::from_secs(300),
            seed: DEFAULT_SEED,
            buffer_len: DEFAULT_BUFFER_LEN,
            quantiles: vec![0.5, 0.99],
            confidence: 0.999,
            reporter: None,
        }
    }
}

impl TrialConfig {
    /// Checks every setting, before any thread is started.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.threads == 0 {
            return Err(ConfigurationError::InvalidThreadCount);
        }
        if self.batch_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize);
        }
        if self.measurement_iterations == 0 {
            return Err(ConfigurationError::ZeroMeasurementIterations);
        }
        match self.iteration {
            IterationMode::Operations { batches: 0 } => {
                return Err(ConfigurationError::EmptyIteration)
            }
            IterationMode::Time(duration) if duration.is_zero() => {
                return Err(ConfigurationError::EmptyIteration)
            }
            _ => {}
        }
        if self.timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }
        if self.buffer_len == 0 {
            return Err(ConfigurationError::EmptyWorkload);
        }
        parse_quantiles(&self.quantiles)?;
        check_confidence(self.confidence)
    }
}

/// A workload to run against an adapter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "benchmark", rename_all = "snake_case")]
pub enum Benchmark {
    /// Increments one untagged counter, resolved once.
    Counter,
    /// Increments one tagged counter, resolved once.
    CounterFixedTags,
    /// Builds a tagged name and looks the counter up on every increment.
    CounterDynamicTags,
    /// Increments one of `counters` pre-resolved counters, picked uniformly.
    CounterSpread { counters: u32 },
    /// Looks up one of `counters` counters by an `id` tag on every increment, picked uniformly.
    CounterSpreadDynamic { counters: u32 },
    /// Records log-normal samples into one histogram.
    Histogram { policy: HistogramPolicy },
}

impl Benchmark {
    /// Every benchmark with default parameters.
    pub fn all() -> Vec<Benchmark> {
        vec![
            Benchmark::Counter,
            Benchmark::CounterFixedTags,
            Benchmark::CounterDynamicTags,
            Benchmark::CounterSpread { counters: DEFAULT_SPREAD },
            Benchmark::CounterSpreadDynamic { counters: DEFAULT_SPREAD },
            Benchmark::Histogram { policy: HistogramPolicy::uniform() },
            Benchmark::Histogram { policy: HistogramPolicy::sliding_time_window() },
            Benchmark::Histogram { policy: HistogramPolicy::buckets() },
            Benchmark::Histogram { policy: HistogramPolicy::summary() },
        ]
    }

    /// The histogram policy this benchmark needs, if any.
    pub fn policy(&self) -> Option<&HistogramPolicy> {
        match self {
            Benchmark::Histogram { policy } => Some(policy),
            _ => None,
        }
    }

    /// Checks the benchmark parameters.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Benchmark::CounterSpread { counters } | Benchmark::CounterSpreadDynamic { counters }
                if *counters == 0 =>
            {
                Err(ConfigurationError::InvalidFanOut)
            }
            Benchmark::Histogram { policy } => policy.validate(),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Benchmark::Counter => f.write_str("counter"),
            Benchmark::CounterFixedTags => f.write_str("counter-fixed-tags"),
            Benchmark::CounterDynamicTags => f.write_str("counter-dynamic-tags"),
            Benchmark::CounterSpread { counters } => write!(f, "counter-spread-{counters}"),
            Benchmark::CounterSpreadDynamic { counters } => {
                write!(f, "counter-spread-dynamic-{counters}")
            }
            Benchmark::Histogram { policy } => {
                write!(f, "histogram-{}", policy.kind().replace('_', "-"))
            }
        }
    }
}

impl FromStr for Benchmark {
    type Err = ConfigurationError;

    /// Parses names such as `counter`, `counter-spread`, `counter-spread-16` or
    /// `histogram-sliding-time-window`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigurationError::UnknownBenchmark(s.to_string());
        let spread = |rest: &str| -> Result<u32, ConfigurationError> {
            match rest {
                "" => Ok(DEFAULT_SPREAD),
                rest => rest.strip_prefix('-').and_then(|n| n.parse().ok()).ok_or_else(unknown),
            }
        };

        let lower = s.to_ascii_lowercase();
        let benchmark = match lower.as_str() {
            "counter" => Benchmark::Counter,
            "counter-fixed-tags" => Benchmark::CounterFixedTags,
            "counter-dynamic-tags" => Benchmark::CounterDynamicTags,
            "histogram-uniform" => Benchmark::Histogram { policy: HistogramPolicy::uniform() },
            "histogram-sliding-time-window" => {
                Benchmark::Histogram { policy: HistogramPolicy::sliding_time_window() }
            }
            "histogram-buckets" => Benchmark::Histogram { policy: HistogramPolicy::buckets() },
            "histogram-summary" => Benchmark::Histogram { policy: HistogramPolicy::summary() },
            other => {
                if let Some(rest) = other.strip_prefix("counter-spread-dynamic") {
                    Benchmark::CounterSpreadDynamic { counters: spread(rest)? }
                } else if let Some(rest) = other.strip_prefix("counter-spread") {
                    Benchmark::CounterSpread { counters: spread(rest)? }
                } else {
                    return Err(unknown());
                }
            }
        };

        benchmark.validate()?;
        Ok(benchmark)
    }
}
