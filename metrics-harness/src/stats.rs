//! Summary statistics over timing samples.
use serde::Serialize;

use crate::{
    error::{AggregationError, ConfigurationError},
    handles::nearest_rank,
    quantile::Quantile,
};

/// Statistics over a sequence of latency samples.
///
/// All values are in the unit of the samples, which is nanoseconds per operation everywhere in
/// this crate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean: f64,
    /// Sample standard deviation; zero for a single sample.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Nearest-rank quantiles, in the order they were requested.
    pub quantiles: Vec<(Quantile, f64)>,
    /// Confidence level of `interval`.
    pub confidence: f64,
    /// Normal-approximation confidence interval of the mean.
    pub interval: (f64, f64),
}

impl LatencySummary {
    /// Value of the quantile `q`, if it was requested.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.quantiles.iter().find(|(quantile, _)| quantile.value() == q).map(|(_, v)| *v)
    }
}

/// Summarizes `samples`.
///
/// The input is never reordered; quantiles are read from a sorted copy, so summarizing the same
/// samples twice gives identical results.
///
/// ## Errors
///
/// Returns [`AggregationError::NoData`] if `samples` is empty.
pub fn summarize(
    samples: &[f64],
    quantiles: &[Quantile],
    confidence: f64,
) -> Result<LatencySummary, AggregationError> {
    if samples.is_empty() {
        return Err(AggregationError::NoData);
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let std_dev = if sorted.len() > 1 {
        let variance = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    } else {
        0.0
    };

    let margin = z_score(confidence) * std_dev / n.sqrt();
    Ok(LatencySummary {
        samples: sorted.len(),
        mean,
        std_dev,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        quantiles: quantiles
            .iter()
            .map(|q| (q.clone(), nearest_rank(&sorted, q.value())))
            .collect(),
        confidence,
        interval: (mean - margin, mean + margin),
    })
}

/// Checks a confidence level.
pub fn check_confidence(confidence: f64) -> Result<(), ConfigurationError> {
    if (0.0..1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidQuantile(confidence))
    }
}

/// Two-sided z-score for the given confidence level.
fn z_score(confidence: f64) -> f64 {
    if confidence <= 0.0 {
        return 0.0;
    }
    inverse_normal_cdf(0.5 + confidence.min(1.0 - f64::EPSILON) / 2.0)
}

/// Inverse of the standard normal CDF, using Acklam's rational approximation.
///
/// Relative error is below 1.15e-9 over `(0, 1)`.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const LOW: f64 = 0.024_25;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// One trial measured against a baseline trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Comparison {
    pub trial: String,
    pub baseline: String,
    /// Mean latency of the trial divided by that of the baseline, or `None` if the baseline mean
    /// is zero.
    pub mean_ratio: Option<f64>,
    /// Mean latency of the trial minus that of the baseline.
    pub mean_delta: f64,
    /// Throughput of the trial divided by that of the baseline, or `None` if the baseline
    /// throughput is zero.
    pub throughput_ratio: Option<f64>,
}

/// Compares a trial with a baseline, given each one's latency summary and throughput.
pub fn compare(
    trial: (&str, &LatencySummary, f64),
    baseline: (&str, &LatencySummary, f64),
) -> Comparison {
    let ratio = |a: f64, b: f64| (b != 0.0).then(|| a / b);
    Comparison {
        trial: trial.0.to_string(),
        baseline: baseline.0.to_string(),
        mean_ratio: ratio(trial.1.mean, baseline.1.mean),
        mean_delta: trial.1.mean - baseline.1.mean,
        throughput_ratio: ratio(trial.2, baseline.2),
    }
}
