use std::sync::atomic::Ordering::Relaxed;

use portable_atomic::{AtomicF64, AtomicU64};

use crate::handles::{DistributionSnapshot, HistogramFn};

/// A bucketed histogram with fixed upper bounds.
///
/// Each recorded value increments exactly one bucket: the first whose bound is greater than or
/// equal to the value, or the implicit `+Inf` bucket past the last bound.  Recording is a binary
/// search plus a handful of relaxed atomic operations, and never allocates.
///
/// Percentiles are estimates: the reported value is the upper bound of the bucket holding the
/// nearest rank, clamped to the largest value observed so far.
#[derive(Debug)]
pub struct AtomicBuckets {
    bounds: Box<[f64]>,
    counts: Box<[AtomicU64]>,
    sum: AtomicF64,
    max: AtomicF64,
}

impl AtomicBuckets {
    /// Creates a new `AtomicBuckets` with the given, strictly increasing, bounds.
    pub fn new(bounds: &[f64]) -> AtomicBuckets {
        // One extra slot for the `+Inf` bucket.
        let counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();

        AtomicBuckets {
            bounds: bounds.into(),
            counts,
            sum: AtomicF64::new(0.0),
            max: AtomicF64::new(f64::NEG_INFINITY),
        }
    }

    /// The configured upper bounds, excluding `+Inf`.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Gets the buckets in cumulative form.
    ///
    /// Each tuple is a bucket bound and the number of values less than or equal to it.  The last
    /// tuple is the `+Inf` bucket, whose count equals the number of values recorded.
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut total = 0;
        self.bounds
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .zip(self.counts.iter())
            .map(|(bound, count)| {
                total += count.load(Relaxed);
                (bound, total)
            })
            .collect()
    }

    /// Sum of all recorded values.
    pub fn sum(&self) -> f64 {
        self.sum.load(Relaxed)
    }

    fn estimate(&self, cumulative: &[(f64, u64)], total: u64, q: f64, max: f64) -> f64 {
        let rank = ((q * total as f64).ceil() as u64).max(1);
        let bound = cumulative
            .iter()
            .find(|(_, count)| *count >= rank)
            .map_or(max, |(bound, _)| *bound);
        bound.min(max)
    }
}

impl HistogramFn for AtomicBuckets {
    fn record(&self, value: f64) {
        let idx = self.bounds.partition_point(|bound| *bound < value);
        self.counts[idx].fetch_add(1, Relaxed);
        self.sum.fetch_add(value, Relaxed);
        self.max.fetch_max(value, Relaxed);
    }

    fn snapshot(&self) -> DistributionSnapshot {
        let cumulative = self.cumulative();
        let total = cumulative.last().map_or(0, |(_, count)| *count);
        if total == 0 {
            return DistributionSnapshot::default();
        }

        let sum = self.sum();
        let max = self.max.load(Relaxed);
        DistributionSnapshot {
            count: total,
            sum,
            mean: sum / total as f64,
            p50: self.estimate(&cumulative, total, 0.5, max),
            p99: self.estimate(&cumulative, total, 0.99, max),
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::AtomicBuckets;
    use crate::handles::HistogramFn;

    #[test]
    fn test_bucket_assignment() {
        let buckets = AtomicBuckets::new(&[10.0, 25.0, 100.0]);
        for value in [3.0, 2.0, 6.0, 12.0, 56.0, 82.0, 202.0, 100.0, 29.0, 10.0] {
            buckets.record(value);
        }

        let cumulative = buckets.cumulative();
        assert_eq!(cumulative.len(), 4);
        assert_eq!(cumulative[0], (10.0, 4));
        assert_eq!(cumulative[1], (25.0, 5));
        assert_eq!(cumulative[2], (100.0, 9));
        assert_eq!(cumulative[3].1, 10);
        assert!(cumulative[3].0.is_infinite());
        assert_eq!(buckets.sum(), 502.0);
    }

    #[test]
    fn test_snapshot_estimates_are_bounded() {
        let buckets = AtomicBuckets::new(&[1.0, 2.0, 4.0, 8.0, 16.0]);
        for value in 1..=10 {
            buckets.record(value as f64);
        }

        let snapshot = buckets.snapshot();
        assert_eq!(snapshot.count, 10);
        assert_eq!(snapshot.sum, 55.0);
        assert_eq!(snapshot.mean, 5.5);
        assert_eq!(snapshot.p50, 8.0);
        // The p99 bucket is 16, but nothing above 10 was observed.
        assert_eq!(snapshot.p99, 10.0);
        assert_eq!(snapshot.max, 10.0);
        assert!(snapshot.p99 >= snapshot.p50);
    }

    #[test]
    fn test_overflow_bucket() {
        let buckets = AtomicBuckets::new(&[1.0]);
        buckets.record(1_000.0);

        let snapshot = buckets.snapshot();
        assert_eq!(snapshot.p50, 1_000.0);
        assert_eq!(snapshot.p99, 1_000.0);
    }

    #[test]
    fn test_concurrent_records() {
        let buckets = Arc::new(AtomicBuckets::new(&[5.0, 50.0]));
        let handles = (0..4)
            .map(|_| {
                let buckets = Arc::clone(&buckets);
                thread::spawn(move || {
                    for i in 0..1000 {
                        buckets.record((i % 100) as f64);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buckets.snapshot().count, 4000);
    }
}
