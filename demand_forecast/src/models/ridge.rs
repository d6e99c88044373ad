//! Closed-form ridge regression
//!
//! Features are standardized before solving `(X'X + alpha*I) b = X'y` with a
//! Cholesky factorization; coefficients are mapped back to the raw feature
//! scale so prediction is a plain dot product.

use super::{Dataset, Regressor};
use crate::error::{DemandError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

const MIN_SCALE: f64 = 1e-10;

/// Fitted ridge regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
    alpha: f64,
}

impl RidgeRegressor {
    /// Fit on a dataset whose columns are `feature_names`
    pub fn fit(data: &Dataset, feature_names: Vec<String>, alpha: f64) -> Result<Self> {
        if alpha < 0.0 {
            return Err(DemandError::InvalidParameter(format!(
                "ridge alpha must be non-negative, got {}",
                alpha
            )));
        }
        if data.is_empty() {
            return Err(DemandError::ModelError("Cannot fit on zero rows".to_string()));
        }
        if data.x.ncols() != feature_names.len() {
            return Err(DemandError::ModelError(format!(
                "Dataset has {} columns but {} feature names",
                data.x.ncols(),
                feature_names.len()
            )));
        }

        let x_mean = data
            .x
            .mean_axis(Axis(0))
            .ok_or_else(|| DemandError::ModelError("Empty design matrix".to_string()))?;
        let y_mean = data.y.mean().unwrap_or(0.0);
        let x_scale = data
            .x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < MIN_SCALE { 1.0 } else { s });

        let x_std = (&data.x - &x_mean) / &x_scale;
        let y_centered = &data.y - y_mean;

        let mut gram = x_std.t().dot(&x_std);
        for i in 0..gram.nrows() {
            gram[[i, i]] += alpha;
        }
        let rhs = x_std.t().dot(&y_centered);
        let beta = cholesky_solve(&gram, &rhs)?;

        let coefficients = &beta / &x_scale;
        let intercept = y_mean - x_mean.dot(&coefficients);

        Ok(Self {
            feature_names,
            coefficients: coefficients.to_vec(),
            intercept,
            alpha,
        })
    }

    /// Coefficients on the raw feature scale
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Intercept
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// L2 penalty used for fitting
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Regressor for RidgeRegressor {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_row(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.coefficients.len() {
            return Err(DemandError::ModelError(format!(
                "Expected {} features, got {}",
                self.coefficients.len(),
                features.len()
            )));
        }
        Ok(self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>())
    }
}

fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return Err(DemandError::ModelError(
                        "Normal equations are not positive definite; increase ridge_alpha"
                            .to_string(),
                    ));
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * z[j]).sum();
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    Ok(x)
}
