use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use crossbeam_utils::CachePadded;
use portable_atomic::AtomicU64;

use crate::handles::CounterFn;

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static STRIPE: usize = NEXT_STRIPE.fetch_add(1, Relaxed);
}

/// A counter striped across cache-padded slots.
///
/// Each thread is assigned a stripe the first time it touches any striped counter, so concurrent
/// writers usually land on different cache lines instead of contending for one.  Reading sums
/// every stripe, which makes reads more expensive than writes.  Updates are never lost: each one is
/// an atomic add on exactly one stripe.
#[derive(Debug)]
pub struct StripedCounter {
    stripes: Box<[CachePadded<AtomicU64>]>,
}

impl StripedCounter {
    /// Creates a new `StripedCounter` with `stripes` slots, rounded up to a power of two.
    pub fn new(stripes: usize) -> StripedCounter {
        let stripes = stripes.max(1).next_power_of_two();
        StripedCounter {
            stripes: (0..stripes).map(|_| CachePadded::new(AtomicU64::new(0))).collect(),
        }
    }

    /// Number of stripes.
    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }
}

impl CounterFn for StripedCounter {
    #[inline]
    fn increment(&self, delta: u64) {
        let idx = STRIPE.with(|stripe| *stripe) & (self.stripes.len() - 1);
        self.stripes[idx].fetch_add(delta, Relaxed);
    }

    fn count(&self) -> u64 {
        self.stripes.iter().map(|stripe| stripe.load(Relaxed)).sum()
    }
}
