use std::sync::Arc;

use portable_atomic::AtomicU64;

use crate::{
    error::ConfigurationError,
    handles::HistogramFn,
    name::MetricName,
    storage::{build_histogram, HistogramPolicy, Storage, StripedCounter},
};

/// Atomic metric storage.
///
/// Every counter is a single `AtomicU64`, so all writers to one counter contend on the same cache
/// line.  Histograms may use a uniform reservoir, a sliding time window or a summary sketch.
#[derive(Clone, Copy, Debug, Default)]
pub struct AtomicStorage;

impl Storage for AtomicStorage {
    type Counter = AtomicU64;

    fn adapter(&self) -> &'static str {
        "atomic"
    }

    fn supports(&self, policy: &HistogramPolicy) -> bool {
        matches!(
            policy,
            HistogramPolicy::Uniform { .. }
                | HistogramPolicy::SlidingTimeWindow { .. }
                | HistogramPolicy::Summary { .. }
        )
    }

    fn counter(&self, _: &MetricName) -> Self::Counter {
        AtomicU64::new(0)
    }

    fn histogram(
        &self,
        _: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Arc<dyn HistogramFn>, ConfigurationError> {
        self.checked_histogram(policy, build_histogram)
    }
}

/// Striped metric storage.
///
/// Counters are split into cache-padded stripes, one per writer thread up to `stripes`, so writers
/// rarely share a cache line.  Histograms may use a uniform reservoir, fixed buckets or a summary
/// sketch.
#[derive(Clone, Copy, Debug)]
pub struct StripedStorage {
    stripes: usize,
}

impl StripedStorage {
    /// Creates a new `StripedStorage` whose counters use `stripes` slots.
    pub fn new(stripes: usize) -> Self {
        Self { stripes: stripes.max(1).next_power_of_two() }
    }

    /// Number of stripes per counter.
    pub fn stripes(&self) -> usize {
        self.stripes
    }
}

impl Default for StripedStorage {
    /// One stripe per available CPU.
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl Storage for StripedStorage {
    type Counter = StripedCounter;

    fn adapter(&self) -> &'static str {
        "striped"
    }

    fn supports(&self, policy: &HistogramPolicy) -> bool {
        matches!(
            policy,
            HistogramPolicy::Uniform { .. }
                | HistogramPolicy::Buckets { .. }
                | HistogramPolicy::Summary { .. }
        )
    }

    fn counter(&self, _: &MetricName) -> Self::Counter {
        StripedCounter::new(self.stripes)
    }

    fn histogram(
        &self,
        _: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Arc<dyn HistogramFn>, ConfigurationError> {
        self.checked_histogram(policy, build_histogram)
    }
}

#[cfg(test)]
mod tests {
    use super::{AtomicStorage, StripedStorage};
    use crate::{
        error::ConfigurationError, handles::CounterFn, name::MetricName, storage::HistogramPolicy,
        storage::Storage,
    };

    #[test]
    fn test_policy_support() {
        let name = MetricName::new("h").unwrap();

        assert!(AtomicStorage.histogram(&name, &HistogramPolicy::sliding_time_window()).is_ok());
        assert!(matches!(
            AtomicStorage.histogram(&name, &HistogramPolicy::buckets()),
            Err(ConfigurationError::UnsupportedPolicy { adapter: "atomic", policy: "buckets" })
        ));

        let striped = StripedStorage::new(3);
        assert_eq!(striped.stripes(), 4);
        assert!(striped.histogram(&name, &HistogramPolicy::buckets()).is_ok());
        assert!(matches!(
            striped.histogram(&name, &HistogramPolicy::sliding_time_window()),
            Err(ConfigurationError::UnsupportedPolicy {
                adapter: "striped",
                policy: "sliding_time_window"
            })
        ));
    }

    #[test]
    fn test_counters_start_at_zero() {
        let name = MetricName::new("c").unwrap();
        assert_eq!(AtomicStorage.counter(&name).count(), 0);
        assert_eq!(StripedStorage::default().counter(&name).count(), 0);
    }
}
