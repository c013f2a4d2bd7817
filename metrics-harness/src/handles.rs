use std::{fmt, sync::Arc};

use serde::Serialize;

/// A counter handler.
pub trait CounterFn: Send + Sync {
    /// Adds `delta` to the counter.
    ///
    /// Must never lose updates under concurrent callers.
    fn increment(&self, delta: u64);

    /// Reads the current count.
    fn count(&self) -> u64;
}

/// A histogram handler.
pub trait HistogramFn: Send + Sync {
    /// Records a value into the distribution.
    fn record(&self, value: f64);

    /// Reads the distribution as of now.
    fn snapshot(&self) -> DistributionSnapshot;
}

/// Point-in-time view of a value distribution.
///
/// `count` and `sum` are exact totals over every recorded value.  `mean`, `p50`, `p99` and `max`
/// are computed from whatever the backing storage retains, so bounded reservoirs and bucketed
/// storage report estimates.  An empty distribution is all zeroes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DistributionSnapshot {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub p50: f64,
    pub p99: f64,
    pub max: f64,
}

impl DistributionSnapshot {
    /// Builds a snapshot from a sorted slice of retained samples plus the exact totals.
    pub(crate) fn from_sorted(sorted: &[f64], count: u64, sum: f64) -> DistributionSnapshot {
        if sorted.is_empty() {
            return DistributionSnapshot { count, sum, ..Default::default() };
        }

        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        DistributionSnapshot {
            count,
            sum,
            mean,
            p50: nearest_rank(sorted, 0.5),
            p99: nearest_rank(sorted, 0.99),
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Nearest-rank quantile over a sorted, non-empty slice.
pub(crate) fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// A counter handle.
///
/// Cloning a `Counter` produces another handle to the same underlying count.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<dyn CounterFn>,
}

impl Counter {
    /// Creates a `Counter` based on a shared handler.
    pub fn from_arc<F: CounterFn + 'static>(a: Arc<F>) -> Self {
        Self { inner: a }
    }

    /// Increments the counter by one.
    #[inline]
    pub fn increment(&self) {
        self.inner.increment(1);
    }

    /// Increments the counter by `delta`.
    #[inline]
    pub fn increment_by(&self, delta: u64) {
        self.inner.increment(delta);
    }

    /// Reads the current count.
    pub fn count(&self) -> u64 {
        self.inner.count()
    }

    /// Whether two handles refer to the same underlying counter.
    pub fn ptr_eq(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter").field("count", &self.count()).finish()
    }
}

/// A histogram handle.
///
/// Cloning a `Histogram` produces another handle to the same underlying distribution.
#[derive(Clone)]
pub struct Histogram {
    inner: Arc<dyn HistogramFn>,
}

impl Histogram {
    /// Creates a `Histogram` based on a shared handler.
    pub fn from_arc<F: HistogramFn + 'static>(a: Arc<F>) -> Self {
        Self { inner: a }
    }

    /// Creates a `Histogram` from an already type-erased handler.
    pub fn from_shared(inner: Arc<dyn HistogramFn>) -> Self {
        Self { inner }
    }

    /// Records a value.
    #[inline]
    pub fn record(&self, value: f64) {
        self.inner.record(value);
    }

    /// Reads the distribution as of now.
    pub fn snapshot(&self) -> DistributionSnapshot {
        self.inner.snapshot()
    }

    /// Whether two handles refer to the same underlying distribution.
    pub fn ptr_eq(&self, other: &Histogram) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{nearest_rank, DistributionSnapshot};

    #[test]
    fn test_nearest_rank() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(nearest_rank(&sorted, 0.0), 1.0);
        assert_eq!(nearest_rank(&sorted, 0.5), 5.0);
        assert_eq!(nearest_rank(&sorted, 0.99), 10.0);
        assert_eq!(nearest_rank(&sorted, 1.0), 10.0);
        assert_eq!(nearest_rank(&[42.0], 0.5), 42.0);
    }

    #[test]
    fn test_snapshot_from_sorted() {
        let empty = DistributionSnapshot::from_sorted(&[], 0, 0.0);
        assert_eq!(empty, DistributionSnapshot::default());

        let snapshot = DistributionSnapshot::from_sorted(&[1.0, 2.0, 3.0, 10.0], 4, 16.0);
        assert_eq!(snapshot.count, 4);
        assert_eq!(snapshot.mean, 4.0);
        assert_eq!(snapshot.p50, 2.0);
        assert_eq!(snapshot.p99, 10.0);
        assert_eq!(snapshot.max, 10.0);
    }
}
