//! The capability interface every metrics backend under test implements.
use std::{fmt, str::FromStr};

use crate::{
    error::{AdapterInitError, ConfigurationError},
    handles::{Counter, Histogram},
    meter::Meter,
    name::MetricName,
    prometheus::{PrometheusAdapter, PrometheusConfig},
    registry::Registry,
    storage::HistogramPolicy,
};

/// A metrics registry under test.
///
/// Implementations must make every method safe to call from any number of threads at once without
/// external locking.  `counter` and `histogram` have get-or-create semantics: for a given
/// [`MetricName`], every call returns a handle to the same underlying metric until
/// [`close`](RegistryAdapter::close) is called.
pub trait RegistryAdapter: Send + Sync {
    /// Name of the adapter, as used on the command line and in reports.
    fn name(&self) -> &'static str;

    /// Whether or not histograms with the given policy can be created.
    fn supports(&self, policy: &HistogramPolicy) -> bool;

    /// Gets or creates a counter.
    fn counter(&self, name: &MetricName) -> Counter;

    /// Gets or creates a histogram.
    ///
    /// Fails if the policy is invalid or not supported.  If a histogram already exists under
    /// `name`, it is returned regardless of the policy it was created with.
    fn histogram(
        &self,
        name: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Histogram, ConfigurationError>;

    /// Reads every meter and hands it to `visit`.
    ///
    /// Reading histograms computes their percentiles, which may be expensive.
    fn visit_meters(&self, visit: &mut dyn FnMut(&MetricName, Meter));

    /// Reads every meter, sorted by name.
    fn meters(&self) -> Vec<(MetricName, Meter)> {
        let mut meters = Vec::new();
        self.visit_meters(&mut |name, meter| meters.push((name.clone(), meter)));
        meters.sort_by(|a, b| a.0.cmp(&b.0));
        meters
    }

    /// Releases every metric held by the adapter.
    fn close(&self) {}
}

/// Builds a fresh adapter for each trial.
pub trait AdapterFactory: Send + Sync {
    /// Name of the adapters this factory builds.
    fn name(&self) -> &str;

    /// Builds a new, empty adapter.
    fn build(&self) -> Result<Box<dyn RegistryAdapter>, AdapterInitError>;
}

/// The reference adapters.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AdapterKind {
    /// Single-atomic counters; uniform, sliding time window and summary histograms.
    Atomic,
    /// Striped counters; uniform, bucketed and summary histograms.
    Striped,
    /// Atomic counters and bucketed histograms rendered in the Prometheus exposition format.
    Prometheus,
}

impl AdapterKind {
    /// Every reference adapter.
    pub const ALL: [AdapterKind; 3] =
        [AdapterKind::Atomic, AdapterKind::Striped, AdapterKind::Prometheus];

    /// Name of the adapter.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Atomic => "atomic",
            AdapterKind::Striped => "striped",
            AdapterKind::Prometheus => "prometheus",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AdapterKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigurationError::UnknownAdapter(s.to_string()))
    }
}

impl AdapterFactory for AdapterKind {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn build(&self) -> Result<Box<dyn RegistryAdapter>, AdapterInitError> {
        let adapter: Box<dyn RegistryAdapter> = match self {
            AdapterKind::Atomic => Box::new(Registry::atomic()),
            AdapterKind::Striped => Box::new(Registry::striped()),
            AdapterKind::Prometheus => Box::new(PrometheusAdapter::new()),
        };
        Ok(adapter)
    }
}

impl AdapterFactory for PrometheusConfig {
    fn name(&self) -> &str {
        AdapterKind::Prometheus.as_str()
    }

    fn build(&self) -> Result<Box<dyn RegistryAdapter>, AdapterInitError> {
        Ok(Box::new(self.clone().build()?))
    }
}
