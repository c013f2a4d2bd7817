//! A pull-model adapter that renders the Prometheus text exposition format.
use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::Arc,
};

use log::warn;
use parking_lot::Mutex;
use portable_atomic::AtomicU64;

mod formatting;
pub use self::formatting::{
    sanitize_label_key, sanitize_label_value, sanitize_metric_name, write_metric_line,
    write_type_line,
};
use self::formatting::{format_bound, label_pairs};
use crate::{
    adapter::RegistryAdapter,
    error::{AdapterInitError, ConfigurationError},
    handles::{Counter, Histogram, HistogramFn},
    meter::Meter,
    name::MetricName,
    registry::Registry,
    storage::{AtomicBuckets, HistogramPolicy, Storage},
};

/// Matches a metric name in a specific way.
///
/// Used for specifying overrides for buckets, allowing a default set of histogram buckets to be
/// specified while adjusting the buckets that get used for specific metrics.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Matcher {
    /// Matches the entire metric name.
    Full(String),
    /// Matches the beginning of the metric name.
    Prefix(String),
    /// Matches the end of the metric name.
    Suffix(String),
}

impl Matcher {
    /// Checks if the given key matches this matcher.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Matcher::Prefix(prefix) => key.starts_with(prefix),
            Matcher::Suffix(suffix) => key.ends_with(suffix),
            Matcher::Full(full) => key == full,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Matcher::Full(_) => 0,
            Matcher::Prefix(_) => 1,
            Matcher::Suffix(_) => 2,
        }
    }
}

/// Configuration of the pull-model adapter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PrometheusConfig {
    /// Bucket bounds for every histogram, replacing the bounds of the requested policy.
    ///
    /// Defaults to `None`: the bounds carried by the `Buckets` policy are used.
    pub buckets: Option<Vec<f64>>,

    /// Bucket bounds for matching metric names, taking precedence over `buckets`.
    ///
    /// When several matchers apply, a full match wins over a prefix match, which wins over a
    /// suffix match.  Defaults to empty.
    pub bucket_overrides: Vec<(Matcher, Vec<f64>)>,

    /// Prefix prepended, with an underscore, to every rendered metric name.  Defaults to `None`.
    pub prefix: Option<String>,
}

impl PrometheusConfig {
    /// Sets the buckets to use for every histogram.
    #[must_use]
    pub fn with_buckets(mut self, values: &[f64]) -> Self {
        self.buckets = Some(values.to_vec());
        self
    }

    /// Sets the buckets to use for histograms whose name matches `matcher`.
    #[must_use]
    pub fn with_buckets_for_metric(mut self, matcher: Matcher, values: &[f64]) -> Self {
        self.bucket_overrides.push((matcher, values.to_vec()));
        self
    }

    /// Sets the prefix of every rendered metric name.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Builds the adapter.
    ///
    /// ## Errors
    ///
    /// Fails if any configured bucket list is empty, unsorted or not finite, or if the prefix is
    /// not a valid metric name.
    pub fn build(mut self) -> Result<PrometheusAdapter, AdapterInitError> {
        let invalid = |reason: String| AdapterInitError::new(ADAPTER, reason);

        if let Some(bounds) = &self.buckets {
            check_bounds(bounds).map_err(|e| invalid(e.to_string()))?;
        }
        for (matcher, bounds) in &self.bucket_overrides {
            check_bounds(bounds).map_err(|e| invalid(format!("{matcher:?}: {e}")))?;
        }
        if let Some(prefix) = &self.prefix {
            if prefix.is_empty() || sanitize_metric_name(prefix) != *prefix {
                return Err(invalid(format!("`{prefix}` is not a valid metric name prefix")));
            }
        }

        self.bucket_overrides.sort_by_key(|(matcher, _)| matcher.precedence());
        Ok(PrometheusAdapter::with_config(self))
    }
}

fn check_bounds(bounds: &[f64]) -> Result<(), ConfigurationError> {
    HistogramPolicy::Buckets { bounds: bounds.to_vec() }.validate()
}

const ADAPTER: &str = "prometheus";

/// Storage for the pull-model adapter.
///
/// Counters are single atomics and histograms are always bucketed.  Typed bucket handles are kept
/// aside so rendering can read cumulative counts.
pub struct PrometheusStorage {
    config: PrometheusConfig,
    histograms: Mutex<Vec<(MetricName, Arc<AtomicBuckets>)>>,
}

impl PrometheusStorage {
    fn bounds_for<'a>(&'a self, name: &MetricName, requested: &'a [f64]) -> &'a [f64] {
        self.config
            .bucket_overrides
            .iter()
            .find(|(matcher, _)| matcher.matches(name.name()))
            .map(|(_, bounds)| bounds.as_slice())
            .or(self.config.buckets.as_deref())
            .unwrap_or(requested)
    }
}

impl Storage for PrometheusStorage {
    type Counter = AtomicU64;

    fn adapter(&self) -> &'static str {
        ADAPTER
    }

    fn supports(&self, policy: &HistogramPolicy) -> bool {
        matches!(policy, HistogramPolicy::Buckets { .. })
    }

    fn counter(&self, _: &MetricName) -> Self::Counter {
        AtomicU64::new(0)
    }

    fn histogram(
        &self,
        name: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Arc<dyn HistogramFn>, ConfigurationError> {
        self.checked_histogram(policy, |policy| {
            let requested = match policy {
                HistogramPolicy::Buckets { bounds } => bounds.as_slice(),
                _ => &[][..],
            };
            let buckets = Arc::new(AtomicBuckets::new(self.bounds_for(name, requested)));
            self.histograms.lock().push((name.clone(), Arc::clone(&buckets)));
            let handle: Arc<dyn HistogramFn> = buckets;
            handle
        })
    }
}

/// The pull-model reference adapter.
///
/// Behaves like the other adapters for the driver, and additionally renders everything it holds in
/// the Prometheus text exposition format through [`render`](PrometheusAdapter::render).  Only the
/// `Buckets` histogram policy is supported.
pub struct PrometheusAdapter {
    registry: Registry<PrometheusStorage>,
}

impl PrometheusAdapter {
    /// Creates an adapter with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PrometheusConfig::default())
    }

    fn with_config(config: PrometheusConfig) -> Self {
        let storage = PrometheusStorage { config, histograms: Mutex::new(Vec::new()) };
        PrometheusAdapter { registry: Registry::new(storage) }
    }

    fn render_name(&self, name: &MetricName) -> String {
        match &self.registry.storage().config.prefix {
            Some(prefix) => sanitize_metric_name(&format!("{}_{}", prefix, name.name())),
            None => sanitize_metric_name(name.name()),
        }
    }

    /// Renders every metric in the text exposition format.
    ///
    /// Families are sorted by name and series by labels, so the output is stable across calls.
    /// Counters get a `_total` suffix; histograms are written as cumulative `_bucket` series ending
    /// with `le="+Inf"`, followed by `_sum` and `_count`.
    ///
    /// Distinct names can sanitize to the same series.  Colliding counters are summed, colliding
    /// histograms are merged when their bounds agree, and a histogram family that clashes with a
    /// counter family is left out.  Every collision is logged at warn level.
    pub fn render(&self) -> String {
        let mut counters = BTreeMap::<String, BTreeMap<Vec<String>, u64>>::new();
        self.registry.visit_counters(|name, counter| {
            let by_labels = counters.entry(self.render_name(name)).or_default();
            match by_labels.entry(label_pairs(name)) {
                Entry::Vacant(entry) => {
                    entry.insert(counter.count());
                }
                Entry::Occupied(mut entry) => {
                    warn!("counter {} collides with another series once sanitized, summing", name);
                    *entry.get_mut() += counter.count();
                }
            }
        });

        let mut histograms = BTreeMap::<String, BTreeMap<Vec<String>, BucketSeries>>::new();
        for (name, buckets) in self.registry.storage().histograms.lock().iter() {
            let series = BucketSeries { cumulative: buckets.cumulative(), sum: buckets.sum() };
            let by_labels = histograms.entry(self.render_name(name)).or_default();
            match by_labels.entry(label_pairs(name)) {
                Entry::Vacant(entry) => {
                    entry.insert(series);
                }
                Entry::Occupied(mut entry) => {
                    if !entry.get_mut().merge(&series) {
                        warn!(
                            "histogram {} collides with a series of different buckets once \
                             sanitized, dropping it",
                            name
                        );
                    }
                }
            }
        }
        histograms.retain(|name, _| {
            let clash = counters.contains_key(name);
            if clash {
                warn!("histogram family {} clashes with a counter family, dropping it", name);
            }
            !clash
        });

        let mut output = String::new();
        for (name, by_labels) in counters {
            write_type_line(&mut output, &name, "counter");
            for (labels, value) in by_labels {
                write_metric_line::<&str, u64>(
                    &mut output,
                    &name,
                    Some("total"),
                    &labels,
                    None,
                    value,
                );
            }
            output.push('\n');
        }

        for (name, by_labels) in histograms {
            write_type_line(&mut output, &name, "histogram");
            for (labels, series) in by_labels {
                for (le, count) in &series.cumulative {
                    write_metric_line(
                        &mut output,
                        &name,
                        Some("bucket"),
                        &labels,
                        Some(("le", format_bound(*le))),
                        count,
                    );
                }
                let count = series.cumulative.last().map_or(0, |(_, count)| *count);
                write_metric_line::<&str, f64>(
                    &mut output,
                    &name,
                    Some("sum"),
                    &labels,
                    None,
                    series.sum,
                );
                write_metric_line::<&str, u64>(
                    &mut output,
                    &name,
                    Some("count"),
                    &labels,
                    None,
                    count,
                );
            }
            output.push('\n');
        }

        output
    }
}

/// A histogram series as read at render time.
struct BucketSeries {
    cumulative: Vec<(f64, u64)>,
    sum: f64,
}

impl BucketSeries {
    /// Adds `other` into this series.  Returns `false`, leaving this series untouched, if the
    /// bucket bounds differ.
    fn merge(&mut self, other: &BucketSeries) -> bool {
        let same_bounds = self.cumulative.len() == other.cumulative.len()
            && self.cumulative.iter().zip(&other.cumulative).all(|((a, _), (b, _))| a == b);
        if !same_bounds {
            return false;
        }

        for ((_, count), (_, other)) in self.cumulative.iter_mut().zip(&other.cumulative) {
            *count += other;
        }
        self.sum += other.sum;
        true
    }
}

impl Default for PrometheusAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAdapter for PrometheusAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn supports(&self, policy: &HistogramPolicy) -> bool {
        self.registry.supports(policy)
    }

    fn counter(&self, name: &MetricName) -> Counter {
        self.registry.get_or_create_counter(name)
    }

    fn histogram(
        &self,
        name: &MetricName,
        policy: &HistogramPolicy,
    ) -> Result<Histogram, ConfigurationError> {
        self.registry.get_or_create_histogram(name, policy)
    }

    fn visit_meters(&self, visit: &mut dyn FnMut(&MetricName, Meter)) {
        self.registry.visit_meters(visit);
    }

    fn close(&self) {
        self.registry.clear();
        self.registry.storage().histograms.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{Matcher, PrometheusAdapter, PrometheusConfig};
    use crate::{
        adapter::RegistryAdapter, error::ConfigurationError, name::MetricName,
        storage::HistogramPolicy,
    };

    fn buckets(bounds: &[f64]) -> HistogramPolicy {
        HistogramPolicy::Buckets { bounds: bounds.to_vec() }
    }

    #[test]
    fn test_render_counters() {
        let adapter = PrometheusAdapter::new();
        adapter.counter(&MetricName::new("requests").unwrap()).increment_by(3);
        adapter
            .counter(&MetricName::with_tags("requests", [("code", "500")]).unwrap())
            .increment();
        adapter.counter(&MetricName::new("app.errors").unwrap()).increment();

        let expected = concat!(
            "# TYPE app_errors counter\n",
            "app_errors_total 1\n",
            "\n",
            "# TYPE requests counter\n",
            "requests_total 3\n",
            "requests_total{code=\"500\"} 1\n",
            "\n",
        );
        assert_eq!(adapter.render(), expected);
    }

    #[test]
    fn test_sanitized_collisions_are_kept() {
        let adapter = PrometheusAdapter::new();
        adapter.counter(&MetricName::new("app.errors").unwrap()).increment();
        adapter.counter(&MetricName::new("app_errors").unwrap()).increment_by(5);

        let policy = buckets(&[1.0]);
        adapter.histogram(&MetricName::new("db.ms").unwrap(), &policy).unwrap().record(0.5);
        adapter.histogram(&MetricName::new("db_ms").unwrap(), &policy).unwrap().record(2.0);
        assert_eq!(adapter.meters().len(), 4);

        let expected = concat!(
            "# TYPE app_errors counter\n",
            "app_errors_total 6\n",
            "\n",
            "# TYPE db_ms histogram\n",
            "db_ms_bucket{le=\"1\"} 1\n",
            "db_ms_bucket{le=\"+Inf\"} 2\n",
            "db_ms_sum 2.5\n",
            "db_ms_count 2\n",
            "\n",
        );
        assert_eq!(adapter.render(), expected);
    }

    #[test]
    fn test_family_type_clash() {
        let adapter = PrometheusAdapter::new();
        adapter.counter(&MetricName::new("jobs").unwrap()).increment();
        adapter.histogram(&MetricName::new("jobs").unwrap(), &buckets(&[1.0])).unwrap().record(1.0);

        let output = adapter.render();
        assert_eq!(output.matches("# TYPE jobs ").count(), 1);
        assert!(output.contains("jobs_total 1\n"));
        assert!(!output.contains("jobs_bucket"));
    }

    #[test]
    fn test_render_histogram() {
        let adapter = PrometheusAdapter::new();
        let name = MetricName::with_tags("latency", [("path", "/a\"b")]).unwrap();
        let histogram = adapter.histogram(&name, &buckets(&[1.0, 5.0, 10.0])).unwrap();
        for value in [0.5, 3.0, 4.0, 7.0, 20.0] {
            histogram.record(value);
        }

        let expected = concat!(
            "# TYPE latency histogram\n",
            "latency_bucket{path=\"/a\\\"b\",le=\"1\"} 1\n",
            "latency_bucket{path=\"/a\\\"b\",le=\"5\"} 3\n",
            "latency_bucket{path=\"/a\\\"b\",le=\"10\"} 4\n",
            "latency_bucket{path=\"/a\\\"b\",le=\"+Inf\"} 5\n",
            "latency_sum{path=\"/a\\\"b\"} 34.5\n",
            "latency_count{path=\"/a\\\"b\"} 5\n",
            "\n",
        );
        assert_eq!(adapter.render(), expected);
    }

    #[test]
    fn test_bucket_overrides_and_prefix() {
        let adapter = PrometheusConfig::default()
            .with_buckets(&[100.0])
            .with_buckets_for_metric(Matcher::Suffix("_ms".to_string()), &[1.0, 2.0])
            .with_buckets_for_metric(Matcher::Full("db_ms".to_string()), &[50.0])
            .with_prefix("bench")
            .build()
            .unwrap();

        let policy = buckets(&[7.0]);
        adapter.histogram(&MetricName::new("db_ms").unwrap(), &policy).unwrap().record(1.0);
        adapter.histogram(&MetricName::new("http_ms").unwrap(), &policy).unwrap().record(1.0);
        adapter.histogram(&MetricName::new("other").unwrap(), &policy).unwrap().record(1.0);

        let output = adapter.render();
        assert!(output.contains("bench_db_ms_bucket{le=\"50\"} 1\n"));
        assert!(output.contains("bench_http_ms_bucket{le=\"2\"} 1\n"));
        assert!(output.contains("bench_other_bucket{le=\"100\"} 1\n"));
        assert!(!output.contains("le=\"7\""));
    }

    #[test]
    fn test_invalid_config() {
        let err = PrometheusConfig::default().with_buckets(&[]).build().err().unwrap();
        assert_eq!(err.adapter, "prometheus");

        let err = PrometheusConfig::default()
            .with_buckets_for_metric(Matcher::Prefix("a".to_string()), &[2.0, 1.0])
            .build()
            .err()
            .unwrap();
        assert!(err.reason.contains("Prefix"));

        assert!(PrometheusConfig::default().with_prefix("bad prefix").build().is_err());
    }

    #[test]
    fn test_only_buckets_supported() {
        let adapter = PrometheusAdapter::new();
        let err = adapter
            .histogram(&MetricName::new("h").unwrap(), &HistogramPolicy::uniform())
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnsupportedPolicy { adapter: "prometheus", policy: "uniform" }
        );
        assert!(adapter.render().is_empty());
    }

    #[test]
    fn test_close_clears_everything() {
        let adapter = PrometheusAdapter::new();
        adapter.counter(&MetricName::new("c").unwrap()).increment();
        adapter.histogram(&MetricName::new("h").unwrap(), &HistogramPolicy::buckets()).unwrap();
        assert!(!adapter.render().is_empty());

        adapter.close();
        assert!(adapter.render().is_empty());
        assert!(adapter.meters().is_empty());
    }
}
