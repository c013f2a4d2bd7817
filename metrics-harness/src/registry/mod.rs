//! Sharded get-or-create metric storage.

mod storage;
use std::{
    hash::BuildHasher,
    sync::{Arc, PoisonError, RwLock},
};

use hashbrown::{DefaultHashBuilder, HashMap};
pub use storage::{AtomicStorage, StripedStorage};

use crate::{
    adapter::RegistryAdapter,
    error::ConfigurationError,
    handles::{Counter, Histogram},
    meter::Meter,
    name::MetricName,
    storage::{HistogramPolicy, Storage},
};

type RegistryHashMap<V> = HashMap<MetricName, V, DefaultHashBuilder>;

/// A high-performance metric registry.
///
/// `Registry` maintains a central listing of counters and histograms mapped by [`MetricName`].
/// The metrics themselves are created by `S`, which decides how values are stored.
///
/// ## Concurrency
///
/// Each metric kind is split into a power-of-two number of shards, each behind its own `RwLock`.
/// Lookups of existing metrics only take a read lock on one shard; creating a metric takes the
/// write lock on that shard and re-checks for a concurrent insert, so exactly one handle ever
/// exists per name.  Callers never need external locking.
///
/// ## Performance
///
/// `Registry` is optimized for reads.  Callers that can hold on to a handle should: every lookup
/// hashes the full name and its tags.
pub struct Registry<S>
where
    S: Storage,
{
    counters: Vec<RwLock<RegistryHashMap<Counter>>>,
    histograms: Vec<RwLock<RegistryHashMap<Histogram>>>,
    shard_mask: usize,
    hasher: DefaultHashBuilder,
    storage: S,
}

impl Registry<AtomicStorage> {
    /// Creates a new `Registry` using atomic storage.
    pub fn atomic() -> Self {
        Self::new(AtomicStorage)
    }
}

impl Registry<StripedStorage> {
    /// Creates a new `Registry` using striped counter storage.
    pub fn striped() -> Self {
        Self::new(StripedStorage::default())
    }
}

impl<S> Registry<S>
where
    S: Storage,
{
    /// Creates a new `Registry`.
    pub fn new(storage: S) -> Self {
        let shard_count = std::cmp::max(1, num_cpus::get()).next_power_of_two();
        let shard_mask = shard_count - 1;
        let hasher = DefaultHashBuilder::default();
        let counters = (0..shard_count)
            .map(|_| RwLock::new(RegistryHashMap::with_hasher(hasher.clone())))
            .collect();
        let histograms = (0..shard_count)
            .map(|_| RwLock::new(RegistryHashMap::with_hasher(hasher.clone())))
            .collect();

        Self { counters, histograms, shard_mask, hasher, storage }
    }

    /// The storage backing this registry.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Removes all metrics from the registry.
    ///
    /// This operation is eventually consistent: metrics will be removed piecemeal, and this method
    /// does not ensure that callers will see the registry as entirely empty at any given point.
    pub fn clear(&self) {
        for shard in &self.counters {
            shard.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
        for shard in &self.histograms {
            shard.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Visits every counter stored in this registry.
    ///
    /// This operation does not lock the entire registry, but proceeds directly through the
    /// shards that are kept internally.  A counter created after the call to `visit_counters`, but
    /// before it finishes, may or may not be observed.
    pub fn visit_counters<F>(&self, mut collect: F)
    where
        F: FnMut(&MetricName, &Counter),
    {
        for shard in &self.counters {
            let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
            for (name, counter) in shard_read.iter() {
                collect(name, counter);
            }
        }
    }

    /// Visits every histogram stored in this registry.
    ///
    /// Proceeds through the shards in the same way as `visit_counters`.
    pub fn visit_histograms<F>(&self, mut collect: F)
    where
        F: FnMut(&MetricName, &Histogram),
    {
        for shard in &self.histograms {
            let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
            for (name, histogram) in shard_read.iter() {
                collect(name, histogram);
            }
        }
    }

    /// Gets a copy of an existing counter.
    pub fn get_counter(&self, name: &MetricName) -> Option<Counter> {
        let (hash, shard) = shard_for(&self.hasher, &self.counters, self.shard_mask, name);
        let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
        shard_read.raw_entry().from_key_hashed_nocheck(hash, name).map(|(_, v)| v.clone())
    }

    /// Gets a copy of an existing histogram.
    pub fn get_histogram(&self, name: &MetricName) -> Option<Histogram> {
        let (hash, shard) = shard_for(&self.hasher, &self.histograms, self.shard_mask, name);
        let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
        shard_read.raw_entry().from_key_hashed_nocheck(hash, name).map(|(_, v)| v.clone())
    }

    /// Gets or creates the given counter.
    pub fn get_or_create_counter(&self, name: &MetricName) -> Counter {
        let (hash, shard) = shard_for(&self.hasher, &self.counters, self.shard_mask, name);

        // Try and get the handle if it exists.
        let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, v)) = shard_read.raw_entry().from_key_hashed_nocheck(hash, name) {
            return v.clone();
        }

        // Switch to write guard and insert the handle first, unless another writer beat us to it.
        drop(shard_read);
        let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
        let (_, v) =
            shard_write.raw_entry_mut().from_key_hashed_nocheck(hash, name).or_insert_with(|| {
                let counter = Counter::from_arc(Arc::new(self.storage.counter(name)));
                (name.clone(), counter)
            });
        v.clone()
    }

    /// Gets or creates the given histogram.
    ///
    /// If a histogram already exists under `name`, it is returned as-is, even if it was created
    /// with a different policy.  Fails if the storage does not support `policy`, or if the policy
    /// is invalid.
    pub fn get_or_create_histogram(
        &self,
        name: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Histogram, ConfigurationError> {
        if !self.storage.supports(policy) {
            return Err(ConfigurationError::UnsupportedPolicy {
                adapter: self.storage.adapter(),
                policy: policy.kind(),
            });
        }

        let (hash, shard) = shard_for(&self.hasher, &self.histograms, self.shard_mask, name);

        let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, v)) = shard_read.raw_entry().from_key_hashed_nocheck(hash, name) {
            return Ok(v.clone());
        }

        drop(shard_read);
        let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, v)) = shard_write.raw_entry().from_key_hashed_nocheck(hash, name) {
            return Ok(v.clone());
        }

        let histogram = Histogram::from_shared(self.storage.histogram(name, policy)?);
        shard_write.insert(name.clone(), histogram.clone());
        Ok(histogram)
    }

    /// Gets a map of all present counters, mapped by name.
    ///
    /// This map is a point-in-time snapshot of the registry.
    pub fn get_counter_handles(&self) -> HashMap<MetricName, Counter> {
        let mut counters = HashMap::new();
        self.visit_counters(|k, v| {
            counters.insert(k.clone(), v.clone());
        });
        counters
    }

    /// Gets a map of all present histograms, mapped by name.
    ///
    /// This map is a point-in-time snapshot of the registry.
    pub fn get_histogram_handles(&self) -> HashMap<MetricName, Histogram> {
        let mut histograms = HashMap::new();
        self.visit_histograms(|k, v| {
            histograms.insert(k.clone(), v.clone());
        });
        histograms
    }
}

#[inline]
fn shard_for<'a, V>(
    hasher: &DefaultHashBuilder,
    shards: &'a [RwLock<RegistryHashMap<V>>],
    shard_mask: usize,
    name: &MetricName,
) -> (u64, &'a RwLock<RegistryHashMap<V>>) {
    let hash = hasher.hash_one(name);
    // `shards.len()` is a power of two and `shard_mask` is `shards.len() - 1`.
    (hash, &shards[hash as usize & shard_mask])
}

impl<S> RegistryAdapter for Registry<S>
where
    S: Storage,
{
    fn name(&self) -> &'static str {
        self.storage.adapter()
    }

    fn supports(&self, policy: &HistogramPolicy) -> bool {
        self.storage.supports(policy)
    }

    fn counter(&self, name: &MetricName) -> Counter {
        self.get_or_create_counter(name)
    }

    fn histogram(
        &self,
        name: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Histogram, ConfigurationError> {
        self.get_or_create_histogram(name, policy)
    }

    fn visit_meters(&self, visit: &mut dyn FnMut(&MetricName, Meter)) {
        self.visit_counters(|name, counter| visit(name, Meter::Counter(counter.count())));
        self.visit_histograms(|name, histogram| visit(name, Meter::Summary(histogram.snapshot())));
    }

    fn close(&self) {
        self.clear();
    }
}
