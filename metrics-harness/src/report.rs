//! Renders trial results as a text table or a JSON document.
use std::fmt::{self, Write as _};

use serde::Serialize;

use crate::{
    driver::{Phase, TrialResult},
    probe::RuntimeSample,
    stats::{compare, Comparison, LatencySummary},
};

/// Status of one trial row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    /// The trial completed but produced no timings.
    NoData,
    Failed { phase: Phase, cause: String },
}

/// One trial, as reported.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialRow {
    pub name: String,
    pub adapter: String,
    pub benchmark: String,
    #[serde(flatten)]
    pub status: RowStatus,
    pub operations: u64,
    pub measure_secs: f64,
    pub snapshot_secs: f64,
    pub throughput: f64,
    pub latency: Option<LatencySummary>,
    pub runtime: Option<RuntimeSample>,
    pub allocations_per_op: Option<f64>,
}

impl TrialRow {
    fn from_result(result: &TrialResult) -> TrialRow {
        let status = match (result.failure(), &result.latency) {
            (Some(failure), _) => {
                RowStatus::Failed { phase: failure.phase, cause: failure.error.to_string() }
            }
            (None, Ok(_)) => RowStatus::Ok,
            (None, Err(_)) => RowStatus::NoData,
        };
        TrialRow {
            name: result.name.clone(),
            adapter: result.adapter.clone(),
            benchmark: result.benchmark.clone(),
            status,
            operations: result.operations,
            measure_secs: result.measure_time.as_secs_f64(),
            snapshot_secs: result.snapshot_time.as_secs_f64(),
            throughput: result.throughput(),
            latency: result.latency.as_ref().ok().cloned(),
            runtime: result.runtime,
            allocations_per_op: result.allocations_per_op(),
        }
    }
}

/// Results of a suite, ready to print.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SuiteReport {
    pub trials: Vec<TrialRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    pub comparisons: Vec<Comparison>,
}

impl SuiteReport {
    /// Creates a report over `results`.
    ///
    /// When `baseline` names a trial that completed with data, every other such trial is compared
    /// against it.
    pub fn new(results: &[TrialResult], baseline: Option<&str>) -> Self {
        let trials = results.iter().map(TrialRow::from_result).collect::<Vec<_>>();

        let comparable = |row: &TrialRow| {
            row.latency.clone().map(|latency| (row.name.clone(), latency, row.throughput))
        };
        let base = baseline
            .and_then(|name| trials.iter().find(|row| row.name == name))
            .and_then(comparable);
        let comparisons = match &base {
            Some((base_name, base_latency, base_throughput)) => trials
                .iter()
                .filter(|row| &row.name != base_name)
                .filter_map(comparable)
                .map(|(name, latency, throughput)| {
                    compare(
                        (name.as_str(), &latency, throughput),
                        (base_name.as_str(), base_latency, *base_throughput),
                    )
                })
                .collect(),
            None => Vec::new(),
        };

        SuiteReport { trials, baseline: baseline.map(str::to_string), comparisons }
    }

    /// Whether any trial failed.
    pub fn has_failures(&self) -> bool {
        self.trials.iter().any(|row| matches!(row.status, RowStatus::Failed { .. }))
    }

    /// Renders the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn nanos(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}

fn ratio(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("x{:.3}", v))
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.trials.iter().map(|row| row.name.len()).max().unwrap_or(0).max(5);

        let mut out = String::new();
        writeln!(
            out,
            "{:<width$}  {:<8}  {:>12}  {:>12}  {:>12}  {:>12}  {:>14}  {:>10}",
            "trial", "status", "mean ns/op", "stddev", "p50", "p99", "ops/sec", "allocs/op",
        )?;
        for row in &self.trials {
            match &row.status {
                RowStatus::Failed { phase, cause } => {
                    writeln!(
                        out,
                        "{:<width$}  {:<8}  during {}: {}",
                        row.name, "FAILED", phase, cause
                    )?;
                }
                RowStatus::NoData => {
                    writeln!(out, "{:<width$}  {:<8}  no data", row.name, "NO DATA")?;
                }
                RowStatus::Ok => {
                    let latency = row.latency.as_ref();
                    writeln!(
                        out,
                        "{:<width$}  {:<8}  {:>12}  {:>12}  {:>12}  {:>12}  {:>14.0}  {:>10}",
                        row.name,
                        "ok",
                        nanos(latency.map(|l| l.mean)),
                        nanos(latency.map(|l| l.std_dev)),
                        nanos(latency.and_then(|l| l.quantile(0.5))),
                        nanos(latency.and_then(|l| l.quantile(0.99))),
                        row.throughput,
                        row.allocations_per_op
                            .map_or_else(|| "-".to_string(), |a| format!("{:.3}", a)),
                    )?;
                }
            }
        }

        if !self.trials.is_empty() {
            writeln!(out, "(pause time: n/a for native code)")?;
        }

        if let Some(baseline) = &self.baseline {
            writeln!(out)?;
            if self.comparisons.is_empty() {
                writeln!(out, "no trials to compare against baseline {}", baseline)?;
            }
            for comparison in &self.comparisons {
                writeln!(
                    out,
                    "{:<width$}  vs {}: mean {} ({:+.1} ns/op), throughput {}",
                    comparison.trial,
                    comparison.baseline,
                    ratio(comparison.mean_ratio),
                    comparison.mean_delta,
                    ratio(comparison.throughput_ratio),
                )?;
            }
        }

        f.write_str(&out)
    }
}
