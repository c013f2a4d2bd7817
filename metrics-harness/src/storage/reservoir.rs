//! An atomic uniform sampling reservoir.
use std::{cell::RefCell, sync::atomic::Ordering::Relaxed};

use portable_atomic::{AtomicF64, AtomicU64};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use crate::handles::{DistributionSnapshot, HistogramFn};

thread_local! {
    static FAST_RNG: RefCell<Xoshiro256StarStar> =
        RefCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()));
}

/// An atomic uniform sampling reservoir.
///
/// [Reservoir sampling][rs] keeps a statistically representative sample of a data stream in fixed
/// space, without knowing the length of the stream in advance.  This is Vitter's
/// ["Algorithm R"][vitter]: the first `capacity` values are kept, and the `n`th value after that
/// replaces a random slot with probability `capacity / n`.  Values that lose the draw are
/// discarded, so once the stream is longer than the reservoir, the snapshot mean and percentiles
/// are estimates.  `count` and `sum` in the
/// snapshot still cover every value.
///
/// A fast thread-local PRNG ([Xoshiro256**][xoshiro]) limits the per-call sampling overhead.
///
/// [rs]: https://en.wikipedia.org/wiki/Reservoir_sampling
/// [vitter]: https://www.cs.umd.edu/~samir/498/vitter.pdf
/// [xoshiro]: https://prng.di.unimi.it
#[derive(Debug)]
pub struct UniformReservoir {
    values: Box<[AtomicF64]>,
    count: AtomicU64,
    sum: AtomicF64,
}

impl UniformReservoir {
    /// Creates a new `UniformReservoir` that stores up to `capacity` samples.
    pub fn new(capacity: usize) -> UniformReservoir {
        let values = (0..capacity).map(|_| AtomicF64::new(0.0)).collect();
        UniformReservoir { values, count: AtomicU64::new(0), sum: AtomicF64::new(0.0) }
    }

    /// Maximum number of retained samples.
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Number of values pushed into the reservoir.
    pub fn count(&self) -> u64 {
        self.count.load(Relaxed)
    }

    /// Records a value, drawing the replacement slot from `rng`.
    ///
    /// [`record`](HistogramFn::record) uses a thread-local generator; this variant exists so a
    /// caller can make the sampling reproducible.
    pub fn record_with<R: Rng>(&self, value: f64, rng: &mut R) {
        self.sum.fetch_add(value, Relaxed);

        let idx = self.count.fetch_add(1, Relaxed);
        let capacity = self.values.len() as u64;
        if idx < capacity {
            self.values[idx as usize].store(value, Relaxed);
        } else {
            let slot = rng.random_range(0..=idx);
            if slot < capacity {
                self.values[slot as usize].store(value, Relaxed);
            }
        }
    }

    /// Copies the currently retained samples.
    pub fn values(&self) -> Vec<f64> {
        let len = (self.count() as usize).min(self.values.len());
        self.values[..len].iter().map(|v| v.load(Relaxed)).collect()
    }
}

impl HistogramFn for UniformReservoir {
    fn record(&self, value: f64) {
        FAST_RNG.with(|rng| self.record_with(value, &mut *rng.borrow_mut()));
    }

    fn snapshot(&self) -> DistributionSnapshot {
        let count = self.count();
        let sum = self.sum.load(Relaxed);

        let mut values = self.values();
        values.sort_unstable_by(f64::total_cmp);
        DistributionSnapshot::from_sorted(&values, count, sum)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    use super::UniformReservoir;
    use crate::{handles::HistogramFn, workload::SampleBuffer};

    #[test]
    fn test_fills_before_sampling() {
        let reservoir = UniformReservoir::new(4);
        for value in [1.0, 2.0, 3.0] {
            reservoir.record(value);
        }
        assert_eq!(reservoir.values(), vec![1.0, 2.0, 3.0]);

        for value in 4..=100 {
            reservoir.record(value as f64);
        }
        assert_eq!(reservoir.values().len(), 4);
        assert_eq!(reservoir.count(), 100);

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.count, 100);
        assert_eq!(snapshot.sum, 5050.0);
        assert!(snapshot.p99 >= snapshot.p50);
        assert!(snapshot.max <= 100.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let reservoir = UniformReservoir::new(16);
        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.mean, 0.0);
    }

    // A reservoir of 1000 fed one million values from [0, 100) estimates the population mean of
    // 50 to within 5%: the standard error of a 1000-sample mean is ~0.9, so 2.5 is ~2.7 sigma.
    #[test]
    fn test_mean_estimate_within_error_bound() {
        let reservoir = UniformReservoir::new(1000);
        let samples = SampleBuffer::uniform(42, 1_000_000, 0.0, 100.0).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(7);
        for value in samples.as_slice() {
            reservoir.record_with(*value, &mut rng);
        }

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.count, 1_000_000);
        assert_relative_eq!(snapshot.mean, 50.0, max_relative = 0.05);
        assert_relative_eq!(snapshot.sum / snapshot.count as f64, 50.0, max_relative = 0.01);
    }

    #[test]
    fn test_concurrent_records_are_all_counted() {
        let reservoir = Arc::new(UniformReservoir::new(128));
        let handles = (0..8)
            .map(|t| {
                let reservoir = Arc::clone(&reservoir);
                thread::spawn(move || {
                    for i in 0..10_000 {
                        reservoir.record((t * i) as f64);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(reservoir.count(), 80_000);
        assert_eq!(reservoir.values().len(), 128);
    }
}
