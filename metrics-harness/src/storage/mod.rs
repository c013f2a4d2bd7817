//! Various data structures for storing metric data.
use std::{sync::Arc, time::Duration};

use portable_atomic::AtomicU64;
use serde::Serialize;

use crate::{
    error::ConfigurationError,
    handles::{CounterFn, HistogramFn},
    name::MetricName,
};

mod bucket;
pub use self::bucket::AtomicBuckets;

mod reservoir;
pub use self::reservoir::UniformReservoir;

mod sketch;
pub use self::sketch::SketchSummary;

mod striped;
pub use self::striped::StripedCounter;

mod window;
pub use self::window::SlidingWindow;

/// Retention policy for a histogram.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HistogramPolicy {
    /// A uniform random sample of fixed capacity over the whole stream.
    Uniform { capacity: usize },
    /// Every value recorded within the trailing window.
    SlidingTimeWindow { window: Duration },
    /// Counts per fixed bucket upper bound, plus an overflow bucket.
    Buckets { bounds: Vec<f64> },
    /// A relative-error quantile sketch.
    Summary { alpha: f64 },
}

impl HistogramPolicy {
    /// Short name of the policy, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            HistogramPolicy::Uniform { .. } => "uniform",
            HistogramPolicy::SlidingTimeWindow { .. } => "sliding_time_window",
            HistogramPolicy::Buckets { .. } => "buckets",
            HistogramPolicy::Summary { .. } => "summary",
        }
    }

    /// A uniform reservoir holding 1028 samples.
    pub fn uniform() -> HistogramPolicy {
        HistogramPolicy::Uniform { capacity: 1028 }
    }

    /// A sliding window over the last ten seconds.
    pub fn sliding_time_window() -> HistogramPolicy {
        HistogramPolicy::SlidingTimeWindow { window: Duration::from_secs(10) }
    }

    /// Buckets laid out by [`default_buckets`](HistogramPolicy::default_buckets).
    pub fn buckets() -> HistogramPolicy {
        HistogramPolicy::Buckets { bounds: HistogramPolicy::default_buckets() }
    }

    /// A summary sketch with 1% relative error.
    pub fn summary() -> HistogramPolicy {
        HistogramPolicy::Summary { alpha: 0.01 }
    }

    /// Bucket bounds suitable for approximating percentiles of positive integer samples.
    ///
    /// Starts with 1, 2 and 3, then for every even power of two `2^e`, adds bounds in steps of
    /// `2^e / 3` up to (but excluding) `4 * 2^e - 2^e / 3`.  The ladder ends at `i64::MAX`.
    pub fn default_buckets() -> Vec<f64> {
        let mut bounds = vec![1.0, 2.0, 3.0];

        let mut exp = 2;
        while exp < 64 {
            let mut current: u64 = 1 << exp;
            let delta = current / 3;
            let Some(next) = current.checked_mul(4).map(|n| n - delta) else {
                break;
            };
            while current < next {
                bounds.push(current as f64);
                current += delta;
            }
            exp += 2;
        }

        bounds.push(i64::MAX as f64);
        bounds
    }

    /// Checks that the policy parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            HistogramPolicy::Uniform { capacity } if *capacity == 0 => {
                Err(ConfigurationError::InvalidReservoirCapacity)
            }
            HistogramPolicy::SlidingTimeWindow { window } if window.is_zero() => {
                Err(ConfigurationError::InvalidWindow)
            }
            HistogramPolicy::Buckets { bounds } => {
                let finite = bounds.iter().all(|b| b.is_finite());
                let increasing = bounds.windows(2).all(|w| w[0] < w[1]);
                if bounds.is_empty() || !finite || !increasing {
                    Err(ConfigurationError::InvalidBuckets)
                } else {
                    Ok(())
                }
            }
            HistogramPolicy::Summary { alpha } if !(*alpha > 0.0 && *alpha < 1.0) => {
                Err(ConfigurationError::InvalidSketchAccuracy(*alpha))
            }
            _ => Ok(()),
        }
    }
}

/// Defines the underlying storage for metrics as well as how to create them.
pub trait Storage: Send + Sync {
    /// The type used for counters.
    type Counter: CounterFn + 'static;

    /// Name of the adapter this storage backs, used in errors.
    fn adapter(&self) -> &'static str;

    /// Whether or not histograms with the given policy can be created.
    fn supports(&self, policy: &HistogramPolicy) -> bool;

    /// Creates an empty counter.
    fn counter(&self, name: &MetricName) -> Self::Counter;

    /// Creates an empty histogram.
    ///
    /// Fails if the policy is invalid or not supported by this storage.
    fn histogram(
        &self,
        name: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Arc<dyn HistogramFn>, ConfigurationError>;

    /// Checks the policy and builds the histogram through `build` if supported.
    fn checked_histogram<F>(
        &self,
        policy: &HistogramPolicy,
        build: F,
    ) -> Result<Arc<dyn HistogramFn>, ConfigurationError>
    where
        F: FnOnce(&HistogramPolicy) -> Arc<dyn HistogramFn>,
        Self: Sized,
    {
        policy.validate()?;
        if !self.supports(policy) {
            return Err(ConfigurationError::UnsupportedPolicy {
                adapter: self.adapter(),
                policy: policy.kind(),
            });
        }
        Ok(build(policy))
    }
}

impl CounterFn for AtomicU64 {
    fn increment(&self, delta: u64) {
        self.fetch_add(delta, std::sync::atomic::Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Builds a histogram for any of the policies implemented in this module.
pub(crate) fn build_histogram(policy: &HistogramPolicy) -> Arc<dyn HistogramFn> {
    match policy {
        HistogramPolicy::Uniform { capacity } => Arc::new(UniformReservoir::new(*capacity)),
        HistogramPolicy::SlidingTimeWindow { window } => Arc::new(SlidingWindow::new(*window)),
        HistogramPolicy::Buckets { bounds } => Arc::new(AtomicBuckets::new(bounds)),
        HistogramPolicy::Summary { alpha } => Arc::new(SketchSummary::new(*alpha)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::HistogramPolicy;
    use crate::error::ConfigurationError;

    #[test]
    fn test_default_buckets() {
        let bounds = HistogramPolicy::default_buckets();
        assert_eq!(&bounds[..6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        // 16 is the first bound past the 2^2 ladder, which stops before 4 * 4 - 1.
        assert!(bounds.contains(&16.0));
        assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*bounds.last().unwrap(), i64::MAX as f64);
        assert!(HistogramPolicy::buckets().validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            HistogramPolicy::Uniform { capacity: 0 }.validate(),
            Err(ConfigurationError::InvalidReservoirCapacity)
        );
        assert_eq!(
            HistogramPolicy::SlidingTimeWindow { window: Duration::ZERO }.validate(),
            Err(ConfigurationError::InvalidWindow)
        );
        assert_eq!(
            HistogramPolicy::Buckets { bounds: vec![] }.validate(),
            Err(ConfigurationError::InvalidBuckets)
        );
        assert_eq!(
            HistogramPolicy::Buckets { bounds: vec![5.0, 1.0] }.validate(),
            Err(ConfigurationError::InvalidBuckets)
        );
        assert_eq!(
            HistogramPolicy::Summary { alpha: 1.5 }.validate(),
            Err(ConfigurationError::InvalidSketchAccuracy(1.5))
        );
        assert!(HistogramPolicy::uniform().validate().is_ok());
        assert!(HistogramPolicy::sliding_time_window().validate().is_ok());
        assert!(HistogramPolicy::summary().validate().is_ok());
    }
}
