use parking_lot::Mutex;
use sketches_ddsketch::{Config, DDSketch};

use crate::handles::{DistributionSnapshot, HistogramFn};

const MAX_BINS: u32 = 2048;
const MIN_VALUE: f64 = 1.0e-9;

/// A quantile sketch with relative-error guarantees.
///
/// Based on [DDSketch][ddsketch], percentiles are within `alpha` relative error of the true value
/// regardless of the range of the recorded values.  `count`, `sum` and `max` are exact.  Every
/// record takes a short lock, so writers contend on a single mutex.
///
/// A sketch only holds positive magnitudes, so negative values go to a second sketch and values
/// within `MIN_VALUE` of zero are counted apart.
///
/// [ddsketch]: https://arxiv.org/abs/1908.10693
pub struct SketchSummary {
    inner: Mutex<Sketches>,
}

struct Sketches {
    negative: DDSketch,
    positive: DDSketch,
    zeroes: usize,
    sum: f64,
    max: Option<f64>,
}

impl Sketches {
    fn count(&self) -> usize {
        self.negative.count() + self.zeroes + self.positive.count()
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.max = Some(self.max.map_or(value, |max| max.max(value)));

        let magnitude = value.abs();
        if magnitude <= MIN_VALUE {
            self.zeroes += 1;
        } else if value > 0.0 {
            self.positive.add(magnitude);
        } else {
            self.negative.add(magnitude);
        }
    }

    fn quantile(&self, q: f64) -> Option<f64> {
        let negatives = self.negative.count();
        let zeroes = self.zeroes;
        let total = self.count();
        if total == 0 {
            return None;
        }
        let rank = ((q * total as f64).ceil() as usize).clamp(1, total);

        if rank <= negatives {
            // Ascending values are descending magnitudes on the negative side.
            let q = 1.0 - (rank - 1) as f64 / negatives as f64;
            self.negative.quantile(q).ok().flatten().map(|v| -v)
        } else if rank <= negatives + zeroes {
            Some(0.0)
        } else {
            let q = (rank - negatives - zeroes) as f64 / self.positive.count() as f64;
            self.positive.quantile(q).ok().flatten()
        }
    }
}

impl SketchSummary {
    /// Creates a new `SketchSummary` with relative accuracy `alpha`.
    pub fn new(alpha: f64) -> SketchSummary {
        let config = Config::new(alpha, MAX_BINS, MIN_VALUE);
        let sketches = Sketches {
            negative: DDSketch::new(config.clone()),
            positive: DDSketch::new(config),
            zeroes: 0,
            sum: 0.0,
            max: None,
        };
        SketchSummary { inner: Mutex::new(sketches) }
    }
}

impl HistogramFn for SketchSummary {
    fn record(&self, value: f64) {
        self.inner.lock().add(value);
    }

    fn snapshot(&self) -> DistributionSnapshot {
        let sketches = self.inner.lock();
        let count = sketches.count() as u64;
        let Some(max) = sketches.max else {
            return DistributionSnapshot::default();
        };

        let quantile = |q: f64| sketches.quantile(q).unwrap_or_default().min(max);
        DistributionSnapshot {
            count,
            sum: sketches.sum,
            mean: sketches.sum / count as f64,
            p50: quantile(0.5),
            p99: quantile(0.99),
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::SketchSummary;
    use crate::handles::HistogramFn;

    #[test]
    fn test_relative_error() {
        let summary = SketchSummary::new(0.01);
        for value in 1..=10_000 {
            summary.record(value as f64);
        }

        let snapshot = summary.snapshot();
        assert_eq!(snapshot.count, 10_000);
        assert_eq!(snapshot.sum, 50_005_000.0);
        assert_eq!(snapshot.max, 10_000.0);
        assert_relative_eq!(snapshot.p50, 5_000.0, max_relative = 0.02);
        assert_relative_eq!(snapshot.p99, 9_900.0, max_relative = 0.02);
        assert!(snapshot.p99 >= snapshot.p50);
    }

    #[test]
    fn test_negative_values() {
        let summary = SketchSummary::new(0.01);
        for value in 1..=100 {
            summary.record(-(value as f64));
        }

        let snapshot = summary.snapshot();
        assert_eq!(snapshot.count, 100);
        assert_eq!(snapshot.sum, -5050.0);
        assert_eq!(snapshot.max, -1.0);
        assert_relative_eq!(snapshot.p50, -50.0, max_relative = 0.05);
        assert_relative_eq!(snapshot.p99, -2.0, max_relative = 0.03);
    }

    #[test]
    fn test_mixed_signs() {
        let summary = SketchSummary::new(0.01);
        for value in -50..=49 {
            summary.record(value as f64);
        }

        let snapshot = summary.snapshot();
        assert_eq!(snapshot.count, 100);
        assert_eq!(snapshot.max, 49.0);
        // Ranks 1..=50 are negative and rank 51 is the zero.
        assert_relative_eq!(snapshot.p50, -1.0, max_relative = 0.03);
        assert_relative_eq!(snapshot.p99, 48.0, max_relative = 0.03);
    }

    #[test]
    fn test_empty() {
        let summary = SketchSummary::new(0.01);
        assert_eq!(summary.snapshot().count, 0);
    }
}
