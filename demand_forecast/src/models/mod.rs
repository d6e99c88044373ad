//! Regressors over the feature table
//!
//! The forecaster only needs [`Regressor`]: a list of the feature columns the
//! model consumes and a point prediction for one row. Any externally trained
//! model can sit behind it; [`ridge::RidgeRegressor`] is the built-in one.

use crate::config::TrainingConfig;
use crate::error::{DemandError, Result};
use crate::features::{FeatureRow, FeatureTable, Split};
use ndarray::{Array1, Array2};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub mod ridge;

pub use ridge::RidgeRegressor;

/// Columns never used as model inputs: identity, label and label-derived
pub const EXCLUDED_COLUMNS: [&str; 11] = [
    "warehouse_id",
    "region",
    "store_id",
    "sku_id",
    "category_id",
    "week",
    "y",
    "promo_flag",
    "share_norm",
    "sku_qty",
    "category_qty",
];

/// A fitted point-forecast model
pub trait Regressor: Send + Sync {
    /// Feature columns consumed, in input order
    fn feature_names(&self) -> &[String];

    /// Predict one row whose values follow [`feature_names`](Self::feature_names)
    fn predict_row(&self, features: &[f64]) -> Result<f64>;

    /// Predict many rows
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }
}

/// Maps full feature vectors onto a model's input columns
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureProjection {
    names: Vec<String>,
    indices: Vec<usize>,
}

impl FeatureProjection {
    /// Resolve `names` against the full column list
    pub fn new(columns: &[String], names: &[String]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|name| {
                columns.iter().position(|c| c == name).ok_or_else(|| {
                    DemandError::ModelError(format!("Model feature '{}' is not built", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            names: names.to_vec(),
            indices,
        })
    }

    /// Selected column names
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Pick the selected values out of a full feature vector
    pub fn project(&self, full: &[f64]) -> Vec<f64> {
        self.indices.iter().map(|&i| full[i]).collect()
    }
}

/// Choose model inputs: drop excluded columns and columns whose variance
/// over the train rows is at or below `variance_threshold`
pub fn select_features(table: &FeatureTable, variance_threshold: f64) -> Vec<String> {
    let train: Vec<&FeatureRow> = table.split(Split::Train).collect();
    let mut dropped = Vec::new();
    let selected: Vec<String> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| !EXCLUDED_COLUMNS.contains(&name.as_str()))
        .filter(|(i, name)| {
            let variance = if train.len() < 2 {
                0.0
            } else {
                train.iter().map(|r| r.features[*i]).population_variance()
            };
            let keep = variance.is_finite() && variance > variance_threshold;
            if !keep {
                dropped.push(name.to_string());
            }
            keep
        })
        .map(|(_, name)| name.clone())
        .collect();
    if !dropped.is_empty() {
        debug!(?dropped, "dropped low-variance features");
    }
    selected
}

/// Design matrix and target
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Rows by features
    pub x: Array2<f64>,
    /// Target
    pub y: Array1<f64>,
}

impl Dataset {
    /// Build from feature rows through a projection
    pub fn from_rows(rows: &[&FeatureRow], projection: &FeatureProjection) -> Result<Self> {
        let width = projection.names().len();
        let flat: Vec<f64> = rows
            .iter()
            .flat_map(|r| projection.project(&r.features))
            .collect();
        let x = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| DemandError::ModelError(e.to_string()))?;
        let y = Array1::from_iter(rows.iter().map(|r| r.y));
        Ok(Self { x, y })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// Split train rows into fit and validation parts: the last
/// `validation_weeks` train rows of each entity are held out, keeping at
/// least one fit row per entity
pub fn validation_split(
    table: &FeatureTable,
    validation_weeks: usize,
) -> (Vec<&FeatureRow>, Vec<&FeatureRow>) {
    let mut per_entity: BTreeMap<_, Vec<&FeatureRow>> = BTreeMap::new();
    for row in table.split(Split::Train) {
        per_entity.entry(&row.key).or_default().push(row);
    }
    let mut fit = Vec::new();
    let mut validation = Vec::new();
    for rows in per_entity.into_values() {
        let held = validation_weeks.min(rows.len().saturating_sub(1));
        let cut = rows.len() - held;
        fit.extend_from_slice(&rows[..cut]);
        validation.extend_from_slice(&rows[cut..]);
    }
    (fit, validation)
}

/// Fit the built-in ridge regressor on the train split
pub fn train_ridge(table: &FeatureTable, config: &TrainingConfig) -> Result<RidgeRegressor> {
    let names = select_features(table, config.variance_threshold);
    if names.is_empty() {
        return Err(DemandError::ModelError(
            "No usable features after selection".to_string(),
        ));
    }
    let projection = FeatureProjection::new(table.columns(), &names)?;
    let (fit_rows, validation_rows) = validation_split(table, config.validation_weeks);
    if fit_rows.is_empty() {
        return Err(DemandError::ModelError("No train rows to fit".to_string()));
    }
    let fit = Dataset::from_rows(&fit_rows, &projection)?;
    let model = RidgeRegressor::fit(&fit, names, config.ridge_alpha)?;
    info!(
        features = model.feature_names().len(),
        fit_rows = fit.len(),
        validation_rows = validation_rows.len(),
        "ridge regressor fitted"
    );
    Ok(model)
}

/// Predict every row of a split with a regressor
pub fn predict_split<R: Regressor + ?Sized>(
    model: &R,
    table: &FeatureTable,
    split: Split,
) -> Result<Vec<(f64, f64)>> {
    let projection = FeatureProjection::new(table.columns(), model.feature_names())?;
    table
        .split(split)
        .map(|row| {
            let pred = model.predict_row(&projection.project(&row.features))?;
            Ok((row.y, pred.max(0.0)))
        })
        .collect()
}
