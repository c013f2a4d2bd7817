//! Runtime side metrics sampled around the measured phase.
use std::time::Duration;

use serde::Serialize;

/// Cumulative runtime counters at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeSample {
    /// Number of heap allocations made so far.
    pub allocations: u64,
    /// Number of bytes allocated so far.
    pub bytes: u64,
    /// Cumulative collector pause time, for runtimes that have one.
    pub pause: Option<Duration>,
}

impl RuntimeSample {
    /// Difference between this sample and an earlier one.
    pub fn since(&self, earlier: &RuntimeSample) -> RuntimeSample {
        RuntimeSample {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            bytes: self.bytes.saturating_sub(earlier.bytes),
            pause: match (self.pause, earlier.pause) {
                (Some(now), Some(then)) => Some(now.saturating_sub(then)),
                _ => None,
            },
        }
    }
}

/// A source of runtime counters.
///
/// Sampled once right before and once right after the measured phase.  The difference is reported
/// next to the latency numbers to help explain outliers; it is advisory only.
pub trait RuntimeProbe: Send + Sync {
    /// Reads the current counters.
    fn sample(&self) -> RuntimeSample;
}

/// A probe that always reads zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProbe;

impl RuntimeProbe for NoopProbe {
    fn sample(&self) -> RuntimeSample {
        RuntimeSample::default()
    }
}
