//! Forecast ledger
//!
//! In-memory stand-in for the forecast store. Rows are keyed by
//! (warehouse, store, product, target week, snapshot); writing the same key
//! twice updates the value fields and never adds a row.

use crate::error::Result;
use crate::forecast::ForecastRow;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Identity of a stored forecast
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForecastKey {
    /// Warehouse identifier
    pub warehouse_id: i64,
    /// Store identifier
    pub store_id: i64,
    /// Product (SKU) identifier
    pub product_id: String,
    /// Week being forecast
    pub target_week: NaiveDate,
    /// When the forecast was produced
    pub snapshot_at: NaiveDateTime,
}

/// Value fields of a stored forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastValue {
    /// Region of the entity
    pub region: String,
    /// Raw prediction
    pub y_pred: f64,
    /// Rounded prediction
    pub y_pred_qty: u64,
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New key
    Inserted,
    /// Existing key, value replaced
    Updated,
    /// Zero prediction not stored
    Skipped,
}

/// Counts of a batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// New rows
    pub inserted: usize,
    /// Replaced rows
    pub updated: usize,
    /// Skipped zero predictions
    pub skipped: usize,
}

#[derive(Serialize)]
struct LedgerRecord<'a> {
    warehouse_id: i64,
    store_id: i64,
    product_id: &'a str,
    target_week: NaiveDate,
    snapshot_at: NaiveDateTime,
    region: &'a str,
    y_pred: f64,
    y_pred_qty: u64,
}

/// Idempotent forecast store
#[derive(Debug, Clone, Default)]
pub struct ForecastLedger {
    rows: BTreeMap<ForecastKey, ForecastValue>,
    skip_zero: bool,
}

impl ForecastLedger {
    /// Empty ledger that stores every prediction
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not store rows whose rounded prediction is zero
    pub fn skip_zero_predictions(mut self, skip: bool) -> Self {
        self.skip_zero = skip;
        self
    }

    /// Insert or update one row
    pub fn upsert(&mut self, key: ForecastKey, value: ForecastValue) -> UpsertOutcome {
        if self.skip_zero && value.y_pred_qty == 0 {
            return UpsertOutcome::Skipped;
        }
        match self.rows.insert(key, value) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        }
    }

    /// Upsert a batch of forecast rows under one snapshot
    pub fn upsert_forecasts(
        &mut self,
        rows: &[ForecastRow],
        snapshot_at: NaiveDateTime,
    ) -> UpsertSummary {
        let mut summary = UpsertSummary::default();
        for row in rows {
            let key = ForecastKey {
                warehouse_id: row.warehouse_id,
                store_id: row.store_id,
                product_id: row.sku_id.clone(),
                target_week: row.target_week,
                snapshot_at,
            };
            let value = ForecastValue {
                region: row.region.clone(),
                y_pred: row.y_pred,
                y_pred_qty: row.y_pred_qty,
            };
            match self.upsert(key, value) {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Skipped => summary.skipped += 1,
            }
        }
        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "forecast ledger upsert"
        );
        summary
    }

    /// Stored value for a key
    pub fn get(&self, key: &ForecastKey) -> Option<&ForecastValue> {
        self.rows.get(key)
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stored rows in key order
    pub fn iter(&self) -> impl Iterator<Item = (&ForecastKey, &ForecastValue)> {
        self.rows.iter()
    }

    /// Write every stored row as CSV
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = crate::io::csv_writer(path)?;
        for (key, value) in &self.rows {
            writer.serialize(LedgerRecord {
                warehouse_id: key.warehouse_id,
                store_id: key.store_id,
                product_id: &key.product_id,
                target_week: key.target_week,
                snapshot_at: key.snapshot_at,
                region: &value.region,
                y_pred: value.y_pred,
                y_pred_qty: value.y_pred_qty,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}
