//! Forecast accuracy metrics

use crate::error::{DemandError, Result};
use serde::{Deserialize, Serialize};

/// Accuracy of predictions against actual quantities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastAccuracy {
    /// Number of compared points
    pub n: usize,
    /// Mean Absolute Error
    pub mae: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error, in percent
    pub mape: f64,
    /// Symmetric Mean Absolute Percentage Error, in percent
    pub smape: f64,
}

/// Compare predictions with actuals.
///
/// Zero actuals (MAPE) and zero `|actual| + |predicted|` (SMAPE) use a
/// denominator of 1 instead of being skipped, so weeks without demand still
/// count.
pub fn forecast_accuracy(predicted: &[f64], actual: &[f64]) -> Result<ForecastAccuracy> {
    if predicted.len() != actual.len() || predicted.is_empty() {
        return Err(DemandError::ValidationError(
            "Predicted and actual values must have the same non-zero length".to_string(),
        ));
    }
    let n = predicted.len() as f64;
    let pairs = || actual.iter().zip(predicted);

    let mae = pairs().map(|(a, p)| (a - p).abs()).sum::<f64>() / n;
    let rmse = (pairs().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / n).sqrt();
    let mape = pairs()
        .map(|(a, p)| {
            let denom = if *a == 0.0 { 1.0 } else { a.abs() };
            (a - p).abs() / denom
        })
        .sum::<f64>()
        / n
        * 100.0;
    let smape = pairs()
        .map(|(a, p)| {
            let denom = a.abs() + p.abs();
            let denom = if denom == 0.0 { 1.0 } else { denom };
            2.0 * (a - p).abs() / denom
        })
        .sum::<f64>()
        / n
        * 100.0;

    Ok(ForecastAccuracy {
        n: predicted.len(),
        mae,
        rmse,
        mape,
        smape,
    })
}

impl std::fmt::Display for ForecastAccuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Forecast Accuracy ({} points):", self.n)?;
        writeln!(f, "  MAE:   {:.4}", self.mae)?;
        writeln!(f, "  RMSE:  {:.4}", self.rmse)?;
        writeln!(f, "  MAPE:  {:.4}%", self.mape)?;
        writeln!(f, "  SMAPE: {:.4}%", self.smape)?;
        Ok(())
    }
}
