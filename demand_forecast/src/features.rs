//! Feature engineering
//!
//! Raw SKU-week rows become one contiguous weekly series per entity
//! (warehouse, store, SKU). For week `t` every history feature is computed
//! from `y[..t]` only, so the label never leaks into its own row. The same
//! [`FeatureSpec::feature_vector`] is used by the recursive forecaster,
//! which keeps training and inference features identical.

use crate::calendar::{calendar_features, week_start, CALENDAR_COLUMNS};
use crate::config::FeatureConfig;
use crate::data::{ExogenousTable, SkuWeekRow};
use crate::error::{DemandError, Result};
use chrono::{Duration, NaiveDate};
use demand_math::rolling::{lag, trailing_difference, trailing_mean, trailing_std};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Name of the promotion flag carried from the previous week
pub const PROMO_PREV_COLUMN: &str = "promo_flag_prev";

/// Identity of one independent weekly series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Warehouse identifier
    pub warehouse_id: i64,
    /// Store identifier
    pub store_id: i64,
    /// SKU identifier
    pub sku_id: String,
    /// Region, used for the exogenous join
    pub region: String,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.warehouse_id, self.store_id, self.sku_id)
    }
}

/// One entity's contiguous weekly history
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySeries {
    /// Entity identity
    pub key: EntityKey,
    /// Category of the SKU
    pub category_id: String,
    /// Contiguous Mondays
    pub weeks: Vec<NaiveDate>,
    /// Demand per week
    pub qty: Vec<f64>,
    /// Largest `share_norm` observed per week
    pub share: Vec<f64>,
}

impl EntitySeries {
    /// Number of weeks
    pub fn len(&self) -> usize {
        self.weeks.len()
    }

    /// Whether the series is empty
    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    /// Last observed week
    pub fn last_week(&self) -> Option<NaiveDate> {
        self.weeks.last().copied()
    }
}

/// Snap rows onto a Monday grid per entity, summing quantities.
///
/// Gaps between an entity's first and last week become zero-demand weeks.
/// Output is ordered by entity key.
pub fn align_weekly(rows: &[SkuWeekRow]) -> Vec<EntitySeries> {
    let mut grouped: BTreeMap<EntityKey, (String, BTreeMap<NaiveDate, (f64, f64)>)> =
        BTreeMap::new();
    for row in rows {
        let key = EntityKey {
            warehouse_id: row.warehouse_id,
            store_id: row.store_id,
            sku_id: row.sku_id.clone(),
            region: row.region.clone(),
        };
        let (category, weeks) = grouped
            .entry(key)
            .or_insert_with(|| (row.category_id.clone(), BTreeMap::new()));
        if category.is_empty() {
            *category = row.category_id.clone();
        }
        let cell = weeks.entry(week_start(row.week)).or_insert((0.0, 0.0));
        cell.0 += row.sku_qty as f64;
        cell.1 = cell.1.max(row.share_norm);
    }

    grouped
        .into_iter()
        .filter_map(|(key, (category_id, observed))| {
            let first = *observed.keys().next()?;
            let last = *observed.keys().next_back()?;
            let mut series = EntitySeries {
                key,
                category_id,
                weeks: Vec::new(),
                qty: Vec::new(),
                share: Vec::new(),
            };
            let mut week = first;
            while week <= last {
                let (qty, share) = observed.get(&week).copied().unwrap_or((0.0, 0.0));
                series.weeks.push(week);
                series.qty.push(qty);
                series.share.push(share);
                week += Duration::weeks(1);
            }
            Some(series)
        })
        .collect()
}

/// Which history features to compute
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSpec {
    lags: Vec<usize>,
    moving_averages: Vec<usize>,
    rolling_std: Vec<usize>,
    exogenous: Vec<String>,
}

impl FeatureSpec {
    /// Build from configuration plus the exogenous column names
    pub fn new(config: &FeatureConfig, exogenous: &[String]) -> Result<Self> {
        if config.lags.is_empty() {
            return Err(DemandError::InvalidParameter(
                "at least one lag is required".to_string(),
            ));
        }
        Ok(Self {
            lags: config.lags.clone(),
            moving_averages: config.moving_averages.clone(),
            rolling_std: config.rolling_std.clone(),
            exogenous: exogenous.to_vec(),
        })
    }

    /// Names of the history features, in [`history_features`](Self::history_features) order
    pub fn history_columns(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lags.iter().map(|k| format!("lag_{}", k)).collect();
        names.extend(self.moving_averages.iter().map(|w| format!("ma_{}", w)));
        names.extend(self.rolling_std.iter().map(|w| format!("std_{}", w)));
        names.push("trend_1".to_string());
        names.push("trend_4".to_string());
        names
    }

    /// Every feature column in [`feature_vector`](Self::feature_vector) order
    pub fn columns(&self) -> Vec<String> {
        let mut names = self.history_columns();
        names.push(PROMO_PREV_COLUMN.to_string());
        names.extend(CALENDAR_COLUMNS.iter().map(|c| c.to_string()));
        names.extend(self.exogenous.iter().cloned());
        names
    }

    /// Exogenous column names
    pub fn exogenous_columns(&self) -> &[String] {
        &self.exogenous
    }

    /// History features of the week right after `history`; undefined values are 0
    pub fn history_features(&self, history: &[f64]) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .lags
            .iter()
            .map(|&k| lag(history, k).unwrap_or(0.0))
            .collect();
        values.extend(
            self.moving_averages
                .iter()
                .map(|&w| trailing_mean(history, w).unwrap_or(0.0)),
        );
        values.extend(
            self.rolling_std
                .iter()
                .map(|&w| trailing_std(history, w).unwrap_or(0.0)),
        );
        values.push(trailing_difference(history, 1).unwrap_or(0.0));
        values.push(trailing_difference(history, 4).unwrap_or(0.0));
        values
    }

    /// Full feature vector of `week` given the history before it
    pub fn feature_vector(
        &self,
        history: &[f64],
        promo_flag_prev: f64,
        week: NaiveDate,
        exogenous: Option<&[f64]>,
    ) -> Vec<f64> {
        let mut values = self.history_features(history);
        values.push(promo_flag_prev);
        values.extend(calendar_features(week));
        match exogenous {
            Some(exo) => values.extend_from_slice(exo),
            None => values.extend(std::iter::repeat(0.0).take(self.exogenous.len())),
        }
        values
    }
}

/// Partition a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Used for fitting
    Train,
    /// Held out at the end of each entity
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => f.write_str("train"),
            Split::Test => f.write_str("test"),
        }
    }
}

/// One model-ready row
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Entity identity
    pub key: EntityKey,
    /// Category of the SKU
    pub category_id: String,
    /// Week described
    pub week: NaiveDate,
    /// Values in [`FeatureTable::columns`] order
    pub features: Vec<f64>,
    /// This week's promotion flag; derived from the label row, never a feature
    pub promo_flag: f64,
    /// Label
    pub y: f64,
    /// Partition
    pub split: Split,
}

/// Flat feature table
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Feature column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows ordered by entity, then week
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a feature column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows of one partition
    pub fn split(&self, split: Split) -> impl Iterator<Item = &FeatureRow> {
        self.rows.iter().filter(move |r| r.split == split)
    }

    /// Write the table as CSV: identity, week, features, `promo_flag`, `y`, `split`
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = crate::io::csv_writer(path)?;
        let mut header: Vec<String> = [
            "warehouse_id",
            "region",
            "store_id",
            "sku_id",
            "category_id",
            "week",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        header.extend(self.columns.iter().cloned());
        header.extend(["promo_flag", "y", "split"].iter().map(|c| c.to_string()));
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![
                row.key.warehouse_id.to_string(),
                row.key.region.clone(),
                row.key.store_id.to_string(),
                row.key.sku_id.clone(),
                row.category_id.clone(),
                row.week.to_string(),
            ];
            record.extend(row.features.iter().map(|v| v.to_string()));
            record.push(row.promo_flag.to_string());
            record.push(row.y.to_string());
            record.push(row.split.to_string());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Output of [`FeatureBuilder::build`]
#[derive(Debug, Clone)]
pub struct FeatureSet {
    /// The feature table
    pub table: FeatureTable,
    /// Aligned series of the entities that survived the history filter
    pub series: Vec<EntitySeries>,
    /// Feature layout, reused by the forecaster
    pub spec: FeatureSpec,
}

/// Builds the feature table from SKU-week rows
#[derive(Debug, Clone)]
pub struct FeatureBuilder<'a> {
    config: &'a FeatureConfig,
    exogenous: Option<&'a ExogenousTable>,
}

impl<'a> FeatureBuilder<'a> {
    /// Create a builder without exogenous factors
    pub fn new(config: &'a FeatureConfig) -> Self {
        Self {
            config,
            exogenous: None,
        }
    }

    /// Left-join these exogenous factors by (region, week)
    pub fn with_exogenous(mut self, exogenous: &'a ExogenousTable) -> Self {
        self.exogenous = Some(exogenous);
        self
    }

    /// Feature layout for this builder
    pub fn spec(&self) -> Result<FeatureSpec> {
        let exogenous = self.exogenous.map(|e| e.columns().to_vec()).unwrap_or_default();
        FeatureSpec::new(self.config, &exogenous)
    }

    /// Align, filter, featurize and split
    pub fn build(&self, rows: &[SkuWeekRow]) -> Result<FeatureSet> {
        let spec = self.spec()?;
        let aligned = align_weekly(rows);
        let total = aligned.len();
        let series: Vec<EntitySeries> = aligned
            .into_iter()
            .filter(|s| s.len() >= self.config.min_history_weeks)
            .collect();
        if series.len() < total {
            info!(
                dropped = total - series.len(),
                min_weeks = self.config.min_history_weeks,
                "dropped entities with short history"
            );
        }

        let per_entity: Vec<(Vec<FeatureRow>, usize)> = series
            .par_iter()
            .map(|s| self.entity_rows(&spec, s))
            .collect();

        let mut missing_exogenous = 0;
        let mut feature_rows = Vec::new();
        for (entity_rows, missing) in per_entity {
            missing_exogenous += missing;
            feature_rows.extend(entity_rows);
        }
        if missing_exogenous > 0 {
            warn!(
                rows = missing_exogenous,
                "no exogenous factors for some rows, filled with 0"
            );
        }
        info!(
            entities = series.len(),
            rows = feature_rows.len(),
            features = spec.columns().len(),
            "feature table built"
        );

        Ok(FeatureSet {
            table: FeatureTable {
                columns: spec.columns(),
                rows: feature_rows,
            },
            series,
            spec,
        })
    }

    fn entity_rows(&self, spec: &FeatureSpec, series: &EntitySeries) -> (Vec<FeatureRow>, usize) {
        let n = series.len();
        let test_len = self.config.test_weeks.min(n.saturating_sub(1));
        let test_start = n - test_len;
        let threshold = self.config.promo_threshold;
        let mut missing = 0;

        let rows = (0..n)
            .map(|t| {
                let week = series.weeks[t];
                let promo_prev = if t == 0 {
                    0.0
                } else {
                    promo_flag(series.share[t - 1], threshold)
                };
                let exo = match self.exogenous {
                    Some(table) => {
                        let found = table.get(&series.key.region, week);
                        if found.is_none() {
                            missing += 1;
                        }
                        found
                    }
                    None => None,
                };
                FeatureRow {
                    key: series.key.clone(),
                    category_id: series.category_id.clone(),
                    week,
                    features: spec.feature_vector(&series.qty[..t], promo_prev, week, exo),
                    promo_flag: promo_flag(series.share[t], threshold),
                    y: series.qty[t],
                    split: if t >= test_start {
                        Split::Test
                    } else {
                        Split::Train
                    },
                }
            })
            .collect();
        (rows, missing)
    }
}

/// 1.0 when a week's share marks a promotion
pub fn promo_flag(share: f64, threshold: f64) -> f64 {
    if share > threshold {
        1.0
    } else {
        0.0
    }
}
