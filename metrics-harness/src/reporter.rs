//! Periodically logs every meter of an adapter via the `log` crate.
//!
//! Dimensional names are flattened into hierarchical, dot-separated names: the prefix, the metric
//! name, then each tag as `key.value`, then the statistic.  A counter `requests{code="200"}` under
//! the prefix `bench` is logged as `bench.requests.code.200.count: 42`.
//!
//! # Run Modes
//! - `turn` logs every meter once
//! - `run` blocks the current thread, logging every `step` until a [`StopSignal`] fires, then logs
//!   once more
use std::time::Duration;

use log::{log, Level};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::{
    adapter::RegistryAdapter,
    handles::DistributionSnapshot,
    meter::{Measurement, MeterVisitor},
    name::MetricName,
};

/// Settings of the step log reporter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReporterConfig {
    /// First segment of every logged name.  Defaults to `bench`.
    pub prefix: String,
    /// Interval between two reports.  Defaults to 60 seconds.
    pub step: Duration,
    /// Whether anything is logged at all.  Defaults to `true`.
    pub enabled: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        ReporterConfig { prefix: "bench".to_string(), step: Duration::from_secs(60), enabled: true }
    }
}

/// Maps a dimensional name to a hierarchical one.
///
/// Whitespace and dots inside segments are replaced by underscores so every tag stays exactly two
/// segments.
pub fn hierarchical_name(prefix: &str, name: &MetricName) -> String {
    let clean = |s: &str| s.replace(|c: char| c.is_whitespace() || c == '.', "_");

    let mut out = String::new();
    if !prefix.is_empty() {
        out.push_str(prefix);
        out.push('.');
    }
    out.push_str(&name.name().replace(char::is_whitespace, "_"));
    for tag in name.tags() {
        out.push('.');
        out.push_str(&clean(tag.key()));
        out.push('.');
        out.push_str(&clean(tag.value()));
    }
    out
}

/// Fires once, waking up anything waiting on it.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    /// Creates a signal that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal.
    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    /// Whether the signal has fired.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Waits until the signal fires or `timeout` elapses, and returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self.cond.wait_while_for(&mut stopped, |stopped| !*stopped, timeout);
        }
        *stopped
    }
}

/// Logs meters by walking them with a [`MeterVisitor`].
#[derive(Clone, Debug)]
pub struct LogReporter {
    config: ReporterConfig,
    level: Level,
}

impl LogReporter {
    /// Creates a new [`LogReporter`] that logs at the info level.
    pub fn new(config: ReporterConfig) -> Self {
        LogReporter { config, level: Level::Info }
    }

    /// Sets the level output is logged at.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Configuration of this reporter.
    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Renders every meter of `adapter` as `name: value` lines, sorted by name.
    pub fn render(&self, adapter: &dyn RegistryAdapter) -> Vec<String> {
        let mut writer = LineWriter { prefix: &self.config.prefix, lines: Vec::new() };
        for (name, meter) in adapter.meters() {
            meter.accept(&name, &mut writer);
        }
        writer.lines
    }

    /// Logs every meter once.
    pub fn turn(&self, adapter: &dyn RegistryAdapter) {
        if !self.config.enabled {
            return;
        }
        for line in self.render(adapter) {
            log!(self.level, "{}", line);
        }
    }

    /// Logs every `step` until `stop` fires, then logs a final time.
    pub fn run(&self, adapter: &dyn RegistryAdapter, stop: &StopSignal) {
        if !self.config.enabled {
            return;
        }
        while !stop.wait_timeout(self.config.step) {
            self.turn(adapter);
        }
        self.turn(adapter);
    }
}

struct LineWriter<'a> {
    prefix: &'a str,
    lines: Vec<String>,
}

impl LineWriter<'_> {
    fn push<V: std::fmt::Display>(&mut self, name: &MetricName, statistic: &str, value: V) {
        let name = hierarchical_name(self.prefix, name);
        self.lines.push(format!("{name}.{statistic}: {value}"));
    }

    fn push_distribution(&mut self, name: &MetricName, snapshot: &DistributionSnapshot) {
        self.push(name, "count", snapshot.count);
        self.push(name, "sum", snapshot.sum);
        self.push(name, "mean", snapshot.mean);
        self.push(name, "p50", snapshot.p50);
        self.push(name, "p99", snapshot.p99);
        self.push(name, "max", snapshot.max);
    }
}

impl MeterVisitor<MetricName> for LineWriter<'_> {
    fn visit_counter(&mut self, name: &MetricName, count: u64) {
        self.push(name, "count", count);
    }

    fn visit_gauge(&mut self, name: &MetricName, value: f64) {
        self.push(name, "value", value);
    }

    fn visit_timer(&mut self, name: &MetricName, snapshot: &DistributionSnapshot) {
        self.push_distribution(name, snapshot);
    }

    fn visit_summary(&mut self, name: &MetricName, snapshot: &DistributionSnapshot) {
        self.push_distribution(name, snapshot);
    }

    fn visit_long_task_timer(&mut self, name: &MetricName, active_tasks: u64, duration: Duration) {
        self.push(name, "active_tasks", active_tasks);
        self.push(name, "duration", duration.as_secs_f64());
    }

    fn visit_function_counter(&mut self, name: &MetricName, count: f64) {
        self.push(name, "count", count);
    }

    fn visit_function_timer(&mut self, name: &MetricName, count: u64, total: Duration) {
        self.push(name, "count", count);
        self.push(name, "total", total.as_secs_f64());
    }

    fn visit_other(&mut self, name: &MetricName, measurements: &[Measurement]) {
        for measurement in measurements {
            self.push(name, &measurement.statistic, measurement.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::{hierarchical_name, LogReporter, ReporterConfig, StopSignal};
    use crate::{
        adapter::RegistryAdapter, name::MetricName, registry::Registry, storage::HistogramPolicy,
    };

    #[test]
    fn test_hierarchical_name() {
        let name = MetricName::with_tags("requests", [("path", "/a.b"), ("code", "200")]).unwrap();
        assert_eq!(hierarchical_name("bench", &name), "bench.requests.code.200.path./a_b");
        assert_eq!(hierarchical_name("", &MetricName::new("my counter").unwrap()), "my_counter");
    }

    #[test]
    fn test_render() {
        let registry = Registry::atomic();
        registry
            .counter(&MetricName::with_tags("requests", [("code", "200")]).unwrap())
            .increment_by(42);
        let histogram = registry
            .histogram(&MetricName::new("latency").unwrap(), &HistogramPolicy::uniform())
            .unwrap();
        histogram.record(4.0);

        let reporter = LogReporter::new(ReporterConfig::default());
        let lines = reporter.render(&registry);
        assert_eq!(
            lines,
            vec![
                "bench.latency.count: 1",
                "bench.latency.sum: 4",
                "bench.latency.mean: 4",
                "bench.latency.p50: 4",
                "bench.latency.p99: 4",
                "bench.latency.max: 4",
                "bench.requests.code.200.count: 42",
            ]
        );
    }

    #[test]
    fn test_stop_signal() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(1)));
        stop.stop();
        assert!(stop.is_stopped());
        assert!(stop.wait_timeout(Duration::from_secs(60)));
    }

    #[test]
    fn test_run_returns_after_stop() {
        let registry = Arc::new(Registry::atomic());
        let stop = Arc::new(StopSignal::new());
        let config = ReporterConfig { step: Duration::from_millis(5), ..Default::default() };

        let handle = {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            thread::spawn(move || LogReporter::new(config).run(&*registry, &stop))
        };

        registry.counter(&MetricName::new("c").unwrap()).increment();
        thread::sleep(Duration::from_millis(20));
        stop.stop();
        handle.join().unwrap();
    }
}
