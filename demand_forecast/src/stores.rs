//! Virtual store split
//!
//! Spreads a warehouse-level SKU series over `N` virtual stores. Each SKU
//! draws a fixed Dirichlet(1) store mix once; every week that mix drifts by
//! a small multiplicative normal noise before the weekly quantity is split
//! with the largest-remainder allocator, so store rows always add back up
//! to the warehouse quantity. Category totals and shares are then restated
//! per store, so each (warehouse, store, category, week) still satisfies
//! `sum(sku_qty) == category_qty`.

use crate::config::StoreSplitConfig;
use crate::data::SkuWeekRow;
use crate::error::{DemandError, Result};
use crate::seed::Seed;
use chrono::NaiveDate;
use demand_math::largest_remainder;
use rand_distr::{Dirichlet, Distribution, Normal};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

const MIN_WEIGHT: f64 = 1e-6;

#[derive(Debug, Default)]
struct SourceWeek {
    category_id: String,
    category_qty: u64,
    share_sum: f64,
    rows: usize,
    sku_qty: u64,
}

/// Split warehouse rows into `config.stores` virtual stores.
///
/// Rows of the same (warehouse, region, SKU, week) are summed first, whatever
/// store they came from. Output is ordered by warehouse, region, SKU, week,
/// then store id.
pub fn split_virtual_stores(
    rows: &[SkuWeekRow],
    config: &StoreSplitConfig,
    seed: Seed,
) -> Result<Vec<SkuWeekRow>> {
    if config.stores == 0 {
        return Err(DemandError::InvalidParameter(
            "stores must be at least 1".to_string(),
        ));
    }
    let drift = Normal::new(0.0, config.drift_scale)
        .map_err(|e| DemandError::InvalidParameter(format!("drift_scale: {}", e)))?;

    let mut groups: BTreeMap<(i64, String, String), BTreeMap<NaiveDate, SourceWeek>> =
        BTreeMap::new();
    for row in rows {
        let week = groups
            .entry((row.warehouse_id, row.region.clone(), row.sku_id.clone()))
            .or_default()
            .entry(row.week)
            .or_default();
        week.category_id = row.category_id.clone();
        week.category_qty += row.category_qty;
        week.share_sum += row.share_norm;
        week.rows += 1;
        week.sku_qty += row.sku_qty;
    }

    let split = groups
        .into_par_iter()
        .map(|((warehouse_id, region, sku_id), weeks)| {
            let mut rng = seed
                .derive(&format!("stores/{}/{}/{}", warehouse_id, region, sku_id))
                .to_rng();
            let base: Vec<f64> = if config.stores > 1 {
                Dirichlet::new(&vec![1.0; config.stores])
                    .map_err(|e| DemandError::InvalidParameter(format!("dirichlet: {}", e)))?
                    .sample(&mut rng)
            } else {
                vec![1.0]
            };

            let mut out = Vec::with_capacity(weeks.len() * config.stores);
            for (week, source) in weeks {
                let parts = if source.sku_qty == 0 {
                    vec![0; config.stores]
                } else {
                    let weights: Vec<f64> = base
                        .iter()
                        .map(|b| (b * (1.0 + drift.sample(&mut rng))).max(MIN_WEIGHT))
                        .collect();
                    largest_remainder(source.sku_qty, &weights)?
                };
                let share_norm = source.share_sum / source.rows.max(1) as f64;
                for (j, qty) in parts.into_iter().enumerate() {
                    out.push(SkuWeekRow {
                        warehouse_id,
                        region: region.clone(),
                        store_id: config.store_base + j as i64,
                        category_id: source.category_id.clone(),
                        sku_id: sku_id.clone(),
                        week,
                        category_qty: source.category_qty,
                        share_norm,
                        sku_qty: qty,
                    });
                }
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out: Vec<SkuWeekRow> = split.into_iter().flatten().collect();
    restate_store_totals(&mut out);
    info!(
        stores = config.stores,
        rows = out.len(),
        "split warehouse series into virtual stores"
    );
    Ok(out)
}

fn store_week_key(row: &SkuWeekRow) -> (i64, &str, i64, &str, NaiveDate) {
    (
        row.warehouse_id,
        row.region.as_str(),
        row.store_id,
        row.category_id.as_str(),
        row.week,
    )
}

/// Set `category_qty` and `share_norm` from the store-level SKU quantities.
/// Store-weeks with no demand keep the warehouse share.
fn restate_store_totals(rows: &mut [SkuWeekRow]) {
    let totals: Vec<u64> = {
        let mut sums: HashMap<(i64, &str, i64, &str, NaiveDate), u64> = HashMap::new();
        for row in rows.iter() {
            *sums.entry(store_week_key(row)).or_default() += row.sku_qty;
        }
        rows.iter().map(|row| sums[&store_week_key(row)]).collect()
    };

    for (row, total) in rows.iter_mut().zip(totals) {
        row.category_qty = total;
        if total > 0 {
            row.share_norm = row.sku_qty as f64 / total as f64;
        }
    }
}
