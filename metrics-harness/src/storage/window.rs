use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::handles::{DistributionSnapshot, HistogramFn};

// Trimming on every record would dominate the cost; the window is trimmed every N records instead.
const TRIM_INTERVAL: u64 = 1024;

#[derive(Debug, Default)]
struct Inner {
    samples: VecDeque<(Instant, f64)>,
    count: u64,
    sum: f64,
}

impl Inner {
    fn trim(&mut self, now: Instant, window: Duration) {
        while let Some((ts, _)) = self.samples.front() {
            if now.duration_since(*ts) <= window {
                break;
            }
            self.samples.pop_front();
        }
    }
}

/// A histogram that retains every value recorded within a trailing time window.
///
/// All writers serialize on a single lock, and memory grows with the write rate: at millions of
/// records per second, a ten second window holds tens of millions of samples.  Throughput numbers
/// for this policy under concurrent load vary wildly between runs and should not be compared
/// directly with the bounded policies.
#[derive(Debug)]
pub struct SlidingWindow {
    window: Duration,
    clock: Clock,
    inner: Mutex<Inner>,
}

impl SlidingWindow {
    /// Creates a new `SlidingWindow` covering the last `window`.
    pub fn new(window: Duration) -> SlidingWindow {
        SlidingWindow::with_clock(window, Clock::new())
    }

    /// Creates a new `SlidingWindow` driven by the given clock.
    pub fn with_clock(window: Duration, clock: Clock) -> SlidingWindow {
        SlidingWindow { window, clock, inner: Mutex::new(Inner::default()) }
    }

    /// Number of samples currently retained, including any not yet trimmed.
    pub fn retained(&self) -> usize {
        self.inner.lock().samples.len()
    }
}

impl HistogramFn for SlidingWindow {
    fn record(&self, value: f64) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.samples.push_back((now, value));
        inner.count += 1;
        inner.sum += value;
        if inner.count % TRIM_INTERVAL == 0 {
            inner.trim(now, self.window);
        }
    }

    fn snapshot(&self) -> DistributionSnapshot {
        let now = self.clock.now();
        let (mut values, count, sum) = {
            let mut inner = self.inner.lock();
            inner.trim(now, self.window);
            let values = inner.samples.iter().map(|(_, v)| *v).collect::<Vec<_>>();
            (values, inner.count, inner.sum)
        };

        values.sort_unstable_by(f64::total_cmp);
        DistributionSnapshot::from_sorted(&values, count, sum)
    }
}
