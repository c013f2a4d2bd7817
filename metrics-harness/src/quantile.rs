use serde::Serialize;

use crate::error::ConfigurationError;

/// A quantile that has both the raw value and a human-friendly display label.
///
/// Reports show percentiles in their abbreviated form: a quantile of `0.99` is labelled `p99`,
/// and `0.999` is labelled `p999`.  `0.0` and `1.0` are labelled `min` and `max`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quantile {
    value: f64,
    label: String,
}

impl Quantile {
    /// Creates a new [`Quantile`] from a floating-point value.
    ///
    /// Returns an error if the value is outside `[0.0, 1.0]` or not a number.
    pub fn new(quantile: f64) -> Result<Quantile, ConfigurationError> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(ConfigurationError::InvalidQuantile(quantile));
        }

        let label = if quantile == 0.0 {
            "min".to_string()
        } else if quantile == 1.0 {
            "max".to_string()
        } else {
            format!("p{}", quantile * 100.0).replace('.', "")
        };

        Ok(Quantile { value: quantile, label })
    }

    /// Gets the human-friendly display label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Gets the raw quantile value.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Parses a slice of floating-point values into a vector of [`Quantile`]s.
pub fn parse_quantiles(quantiles: &[f64]) -> Result<Vec<Quantile>, ConfigurationError> {
    quantiles.iter().map(|q| Quantile::new(*q)).collect()
}
