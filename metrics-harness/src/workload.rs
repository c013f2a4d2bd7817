//! Deterministic, pre-materialized sample sequences.
//!
//! Generating random values on the measured path would pollute the timings, so every sequence is
//! generated once, up front, into an immutable buffer.  Each worker then owns a [`Generator`] that
//! cycles through the buffer, making the sequence logically infinite while the storage is finite.
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256StarStar;

use crate::error::ConfigurationError;

/// Default number of samples materialized per trial.
pub const DEFAULT_BUFFER_LEN: usize = 1 << 20;

/// Default seed for every workload.
pub const DEFAULT_SEED: u64 = 1_234_567_891;

/// An immutable buffer of pre-generated samples.
///
/// Cloning the buffer is cheap and shares the underlying samples.
#[derive(Clone, Debug)]
pub struct SampleBuffer<T> {
    samples: Arc<[T]>,
}

impl<T> SampleBuffer<T> {
    fn generate<F>(seed: u64, len: usize, mut f: F) -> Result<SampleBuffer<T>, ConfigurationError>
    where
        F: FnMut(&mut Xoshiro256StarStar) -> T,
    {
        if len == 0 {
            return Err(ConfigurationError::EmptyWorkload);
        }

        let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
        let samples = (0..len).map(|_| f(&mut rng)).collect::<Arc<[T]>>();
        Ok(SampleBuffer { samples })
    }

    /// Number of distinct samples before the sequence wraps around.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether or not the buffer is empty.  Buffers built by this module never are.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The raw samples.
    pub fn as_slice(&self) -> &[T] {
        &self.samples
    }
}

impl SampleBuffer<f64> {
    /// Samples drawn from `round(exp(2 + N(0, 1)))`: a heavy right tail around a median of ~7.
    pub fn log_normal(seed: u64, len: usize) -> Result<SampleBuffer<f64>, ConfigurationError> {
        SampleBuffer::generate(seed, len, |rng| {
            let z: f64 = rng.sample(StandardNormal);
            (2.0 + z).exp().round()
        })
    }

    /// Samples drawn uniformly from `[low, high)`.
    pub fn uniform(
        seed: u64,
        len: usize,
        low: f64,
        high: f64,
    ) -> Result<SampleBuffer<f64>, ConfigurationError> {
        if !(low < high) {
            return Err(ConfigurationError::EmptyWorkload);
        }
        SampleBuffer::generate(seed, len, |rng| rng.random_range(low..high))
    }
}

impl SampleBuffer<u32> {
    /// Counter selections drawn uniformly from `[0, k)`.
    pub fn indices(seed: u64, len: usize, k: u32) -> Result<SampleBuffer<u32>, ConfigurationError> {
        if k == 0 {
            return Err(ConfigurationError::InvalidFanOut);
        }
        SampleBuffer::generate(seed, len, |rng| rng.random_range(0..k))
    }
}

impl<T: Copy> SampleBuffer<T> {
    /// Creates a generator positioned at the start of the buffer.
    pub fn generator(&self) -> Generator<T> {
        Generator { samples: Arc::clone(&self.samples), idx: 0 }
    }
}

/// A cursor over a [`SampleBuffer`] that wraps around forever.
///
/// A generator is owned by exactly one worker thread.
pub struct Generator<T> {
    samples: Arc<[T]>,
    idx: usize,
}

impl<T: Copy> Generator<T> {
    /// Returns the next sample, wrapping to the start of the buffer when exhausted.
    #[inline]
    pub fn next_sample(&mut self) -> T {
        let value = self.samples[self.idx];
        self.idx += 1;
        if self.idx == self.samples.len() {
            self.idx = 0;
        }
        value
    }

    /// Restarts the sequence from the beginning.
    pub fn restart(&mut self) {
        self.idx = 0;
    }
}

impl<T: Copy> Iterator for Generator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        Some(self.next_sample())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

#[cfg(test)]
mod tests {
    use super::{SampleBuffer, DEFAULT_SEED};
    use crate::error::ConfigurationError;

    #[test]
    fn test_same_seed_same_sequence() {
        let a = SampleBuffer::log_normal(DEFAULT_SEED, 1 << 14).unwrap();
        let b = SampleBuffer::log_normal(DEFAULT_SEED, 1 << 14).unwrap();

        let first = a.generator().take(10_000).map(f64::to_bits).collect::<Vec<_>>();
        let second = b.generator().take(10_000).map(f64::to_bits).collect::<Vec<_>>();
        assert_eq!(first, second);

        let other = SampleBuffer::log_normal(DEFAULT_SEED + 1, 1 << 14).unwrap();
        let third = other.generator().take(10_000).map(f64::to_bits).collect::<Vec<_>>();
        assert_ne!(first, third);
    }

    #[test]
    fn test_generator_wraps_around() {
        let buffer = SampleBuffer::indices(7, 3, 1000).unwrap();
        let expected = buffer.as_slice().to_vec();

        let mut gen = buffer.generator();
        let drawn = (0..7).map(|_| gen.next_sample()).collect::<Vec<_>>();
        assert_eq!(&drawn[0..3], &expected[..]);
        assert_eq!(&drawn[3..6], &expected[..]);
        assert_eq!(drawn[6], expected[0]);

        gen.restart();
        assert_eq!(gen.next_sample(), expected[0]);
    }

    #[test]
    fn test_generators_are_independent() {
        let buffer = SampleBuffer::indices(1, 16, 4).unwrap();
        let mut a = buffer.generator();
        let mut b = buffer.generator();
        a.next_sample();
        a.next_sample();
        assert_eq!(b.next_sample(), buffer.as_slice()[0]);
    }

    #[test]
    fn test_sample_ranges() {
        let indices = SampleBuffer::indices(DEFAULT_SEED, 10_000, 64).unwrap();
        assert!(indices.as_slice().iter().all(|i| *i < 64));

        let values = SampleBuffer::uniform(DEFAULT_SEED, 10_000, 0.0, 100.0).unwrap();
        assert!(values.as_slice().iter().all(|v| (0.0..100.0).contains(v)));

        let skewed = SampleBuffer::log_normal(DEFAULT_SEED, 10_000).unwrap();
        assert!(skewed.as_slice().iter().all(|v| *v >= 0.0 && v.fract() == 0.0));
    }

    #[test]
    fn test_empty_workloads_rejected() {
        assert_eq!(SampleBuffer::log_normal(1, 0).unwrap_err(), ConfigurationError::EmptyWorkload);
        assert_eq!(SampleBuffer::indices(1, 10, 0).unwrap_err(), ConfigurationError::InvalidFanOut);
        assert!(SampleBuffer::uniform(1, 10, 5.0, 5.0).is_err());
    }
}
