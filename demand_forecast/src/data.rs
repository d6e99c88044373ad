//! Typed input tables and their loaders
//!
//! Every table is read with polars, checked for its required columns and
//! converted into plain records before any computation touches it. A
//! missing column is never recovered from: the loader fails with
//! [`DemandError::SchemaError`] naming the table and the absent columns.

use crate::calendar::{parse_date, week_start};
use crate::error::{DemandError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

/// Smallest base share used when taking logarithms
pub const MIN_BASE_SHARE: f64 = 1e-6;

/// Canonical form of a category id used for joins: trimmed, lowercase,
/// with whitespace, `_` and `-` removed
pub fn normalize_category_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether a SKU id matches `^[A-Z0-9-]+$`
pub fn is_valid_sku_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

/// Fail with the first offending ids when any SKU id is malformed
pub fn validate_sku_ids<'a, I>(ids: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let bad: Vec<&str> = ids.into_iter().filter(|id| !is_valid_sku_id(id)).collect();
    if bad.is_empty() {
        return Ok(());
    }
    Err(DemandError::InvalidSkuId {
        examples: bad.iter().take(5).map(|s| s.to_string()).collect(),
        count: bad.len(),
    })
}

/// Static catalog entry for one SKU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuRecord {
    /// Unique SKU identifier
    pub sku_id: String,
    /// Category as written in the catalog
    pub category_id: String,
    /// Brand name
    pub brand: Option<String>,
    /// Long-run expected share of the category, normalized per category
    pub base_share: f64,
    /// First week the SKU can sell
    pub launch_date: Option<NaiveDate>,
    /// First date the SKU no longer sells
    pub eol_date: Option<NaiveDate>,
    /// List price
    pub price: Option<f64>,
    /// `high`, `mid` or `low`
    pub price_tier: Option<String>,
    /// Energy efficiency grade
    pub energy_grade: Option<String>,
    /// Screen size, capacity or similar
    pub size: Option<f64>,
}

impl SkuRecord {
    /// A SKU with only the required fields set
    pub fn new(sku_id: impl Into<String>, category_id: impl Into<String>, base_share: f64) -> Self {
        Self {
            sku_id: sku_id.into(),
            category_id: category_id.into(),
            brand: None,
            base_share,
            launch_date: None,
            eol_date: None,
            price: None,
            price_tier: None,
            energy_grade: None,
            size: None,
        }
    }

    /// Set the launch date
    pub fn with_launch_date(mut self, date: NaiveDate) -> Self {
        self.launch_date = Some(date);
        self
    }

    /// Set the end-of-life date
    pub fn with_eol_date(mut self, date: NaiveDate) -> Self {
        self.eol_date = Some(date);
        self
    }

    /// Set the price tier
    pub fn with_price_tier(mut self, tier: impl Into<String>) -> Self {
        self.price_tier = Some(tier.into());
        self
    }

    /// Set the energy grade
    pub fn with_energy_grade(mut self, grade: impl Into<String>) -> Self {
        self.energy_grade = Some(grade.into());
        self
    }

    /// Set the size attribute
    pub fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }

    /// Normalized category key
    pub fn category_key(&self) -> String {
        normalize_category_key(&self.category_id)
    }
}

/// Validated SKU catalog grouped by normalized category key
#[derive(Debug, Clone)]
pub struct Catalog {
    skus: Vec<SkuRecord>,
    by_category: BTreeMap<String, Vec<usize>>,
}

impl Catalog {
    /// Validate the records and normalize base shares within each category.
    ///
    /// Categories whose shares sum to zero fall back to a uniform split.
    pub fn new(skus: Vec<SkuRecord>) -> Result<Self> {
        validate_sku_ids(skus.iter().map(|s| s.sku_id.as_str()))?;

        let mut seen: HashSet<&str> = HashSet::new();
        for sku in skus.iter() {
            if !seen.insert(sku.sku_id.as_str()) {
                return Err(DemandError::ValidationError(format!(
                    "Duplicate sku_id '{}' in catalog",
                    sku.sku_id
                )));
            }
            if !sku.base_share.is_finite() || sku.base_share < 0.0 {
                return Err(DemandError::ValidationError(format!(
                    "SKU '{}' has invalid base_share {}",
                    sku.sku_id, sku.base_share
                )));
            }
        }

        let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, sku) in skus.iter().enumerate() {
            by_category.entry(sku.category_key()).or_default().push(i);
        }

        let mut skus = skus;
        for (category, members) in &by_category {
            let total: f64 = members.iter().map(|&i| skus[i].base_share).sum();
            if total > 0.0 {
                for &i in members {
                    skus[i].base_share /= total;
                }
            } else {
                warn!(
                    category = %category,
                    skus = members.len(),
                    "base_share sums to zero, using a uniform split"
                );
                let uniform = 1.0 / members.len() as f64;
                for &i in members {
                    skus[i].base_share = uniform;
                }
            }
        }

        debug!(
            skus = skus.len(),
            categories = by_category.len(),
            "catalog loaded"
        );
        Ok(Self { skus, by_category })
    }

    /// All SKUs in load order
    pub fn skus(&self) -> &[SkuRecord] {
        &self.skus
    }

    /// Number of SKUs
    pub fn len(&self) -> usize {
        self.skus.len()
    }

    /// Whether the catalog has no SKUs
    pub fn is_empty(&self) -> bool {
        self.skus.is_empty()
    }

    /// SKUs of one category in catalog order; `category` may be unnormalized
    pub fn category(&self, category: &str) -> Option<Vec<&SkuRecord>> {
        self.by_category
            .get(&normalize_category_key(category))
            .map(|members| members.iter().map(|&i| &self.skus[i]).collect())
    }

    /// Normalized keys of every category with at least one SKU
    pub fn category_keys(&self) -> impl Iterator<Item = &str> {
        self.by_category.keys().map(String::as_str)
    }

    /// Look up a SKU by id
    pub fn get(&self, sku_id: &str) -> Option<&SkuRecord> {
        self.skus.iter().find(|s| s.sku_id == sku_id)
    }

    /// Fail when the demand series contains categories the catalog lacks
    pub fn check_coverage(&self, series: &[CategoryWeek]) -> Result<()> {
        let missing: Vec<String> = series
            .iter()
            .map(|row| row.category_id.as_str())
            .filter(|c| !self.by_category.contains_key(&normalize_category_key(c)))
            .map(str::to_string)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DemandError::MissingCatalogCategory(missing))
        }
    }
}

/// One category-week demand observation for a (warehouse, region, store)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryWeek {
    /// Warehouse identifier
    pub warehouse_id: i64,
    /// Region, used to join weather and exogenous factors
    pub region: String,
    /// Store identifier
    pub store_id: i64,
    /// Category as written in the series
    pub category_id: String,
    /// Monday of the week
    pub week: NaiveDate,
    /// Total category demand
    pub demand_qty: u64,
}

/// Drop rows whose normalized category is in `excluded`
pub fn filter_excluded_categories(
    series: Vec<CategoryWeek>,
    excluded: &[String],
) -> Vec<CategoryWeek> {
    let excluded: HashSet<String> = excluded.iter().map(|c| normalize_category_key(c)).collect();
    let before = series.len();
    let kept: Vec<CategoryWeek> = series
        .into_iter()
        .filter(|row| !excluded.contains(&normalize_category_key(&row.category_id)))
        .collect();
    if kept.len() < before {
        info!(
            dropped = before - kept.len(),
            "dropped rows of excluded categories"
        );
    }
    kept
}

/// One decomposed (warehouse, store, SKU, week) observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuWeekRow {
    /// Warehouse identifier
    pub warehouse_id: i64,
    /// Region of the warehouse
    pub region: String,
    /// Store identifier
    pub store_id: i64,
    /// Category of the SKU
    pub category_id: String,
    /// SKU identifier
    pub sku_id: String,
    /// Monday of the week
    pub week: NaiveDate,
    /// Category total this row is a part of
    pub category_qty: u64,
    /// Final normalized share of the SKU in that week
    pub share_norm: f64,
    /// Allocated quantity
    pub sku_qty: u64,
}

/// Scheduled promotion uplifts keyed by (sku, week)
#[derive(Debug, Clone, Default)]
pub struct PromotionSchedule {
    boosts: HashMap<(String, NaiveDate), Option<f64>>,
}

impl PromotionSchedule {
    /// Empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a promotion; `boost` of `None` means the configured default
    pub fn insert(&mut self, sku_id: impl Into<String>, week: NaiveDate, boost: Option<f64>) {
        self.boosts.insert((sku_id.into(), week_start(week)), boost);
    }

    /// Share multiplier for a SKU-week, `1.0` when nothing is scheduled
    pub fn multiplier(&self, sku_id: &str, week: NaiveDate, default_boost: f64) -> f64 {
        match self.boosts.get(&(sku_id.to_string(), week_start(week))) {
            Some(boost) => 1.0 + boost.unwrap_or(default_boost),
            None => 1.0,
        }
    }

    /// Number of scheduled entries
    pub fn len(&self) -> usize {
        self.boosts.len()
    }

    /// Whether nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.boosts.is_empty()
    }
}

/// External weekly factors keyed by (region, week)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExogenousTable {
    columns: Vec<String>,
    rows: BTreeMap<(String, NaiveDate), Vec<f64>>,
}

impl ExogenousTable {
    /// Empty table with the given feature columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Insert or replace the values for one (region, week)
    pub fn insert(&mut self, region: impl Into<String>, week: NaiveDate, values: Vec<f64>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(DemandError::ValidationError(format!(
                "Exogenous row has {} values, expected {}",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.insert((region.into(), week_start(week)), values);
        Ok(())
    }

    /// Feature column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of (region, week) rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct regions in sorted order
    pub fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self.rows.keys().map(|(r, _)| r.clone()).collect();
        regions.dedup();
        regions
    }

    /// Values for an exact (region, week)
    pub fn get(&self, region: &str, week: NaiveDate) -> Option<&[f64]> {
        self.rows
            .get(&(region.to_string(), week_start(week)))
            .map(Vec::as_slice)
    }

    /// Most recent values for `region` at or before `week`
    pub fn last_known(&self, region: &str, week: NaiveDate) -> Option<&[f64]> {
        let key = region.to_string();
        self.rows
            .range((key.clone(), NaiveDate::MIN)..=(key, week_start(week)))
            .next_back()
            .map(|(_, v)| v.as_slice())
    }
}

/// Loader for the pipeline's CSV inputs
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Read a CSV file into a DataFrame
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;
        Ok(df)
    }

    /// Load and validate the SKU catalog
    pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Catalog> {
        Self::catalog_from_frame(&Self::read_csv(path)?)
    }

    /// Build the catalog from a DataFrame
    pub fn catalog_from_frame(df: &DataFrame) -> Result<Catalog> {
        let table = Table::new("catalog", df, &["sku_id", "category_id", "base_share"])?;
        let ids = table.required_strings("sku_id")?;
        validate_sku_ids(ids.iter().map(String::as_str))?;
        let categories = table.required_strings("category_id")?;
        let shares = table.required_floats("base_share")?;
        let brands = table.optional_strings("brand")?;
        let launches = table.optional_dates("launch_date")?;
        let eols = table.optional_dates("eol_date")?;
        let prices = table.optional_floats("price")?;
        let tiers = table.optional_strings("price_tier")?;
        let grades = table.optional_strings("energy_grade")?;
        let sizes = table.optional_floats("size")?;

        let skus = (0..df.height())
            .map(|i| SkuRecord {
                sku_id: ids[i].clone(),
                category_id: categories[i].clone(),
                brand: brands[i].clone(),
                base_share: shares[i],
                launch_date: launches[i],
                eol_date: eols[i],
                price: prices[i],
                price_tier: tiers[i].clone(),
                energy_grade: grades[i].clone(),
                size: sizes[i],
            })
            .collect();
        Catalog::new(skus)
    }

    /// Load the category demand series
    pub fn load_category_series<P: AsRef<Path>>(path: P) -> Result<Vec<CategoryWeek>> {
        Self::category_series_from_frame(&Self::read_csv(path)?)
    }

    /// Build the category demand series from a DataFrame; weeks snap to Mondays
    pub fn category_series_from_frame(df: &DataFrame) -> Result<Vec<CategoryWeek>> {
        let table = Table::new(
            "category_series",
            df,
            &[
                "warehouse_id",
                "region",
                "store_id",
                "category_id",
                "week",
                "demand_qty",
            ],
        )?;
        let warehouses = table.required_ints("warehouse_id")?;
        let regions = table.required_strings("region")?;
        let stores = table.required_ints("store_id")?;
        let categories = table.required_strings("category_id")?;
        let weeks = table.required_dates("week")?;
        let demand = table.required_floats("demand_qty")?;

        (0..df.height())
            .map(|i| {
                if demand[i] < 0.0 {
                    return Err(DemandError::ValidationError(format!(
                        "Negative demand_qty {} in category_series row {}",
                        demand[i], i
                    )));
                }
                Ok(CategoryWeek {
                    warehouse_id: warehouses[i],
                    region: regions[i].clone(),
                    store_id: stores[i],
                    category_id: categories[i].clone(),
                    week: week_start(weeks[i]),
                    demand_qty: demand[i].round() as u64,
                })
            })
            .collect()
    }

    /// Load the promotion schedule
    pub fn load_promotions<P: AsRef<Path>>(path: P) -> Result<PromotionSchedule> {
        Self::promotions_from_frame(&Self::read_csv(path)?)
    }

    /// Build the promotion schedule from a DataFrame.
    ///
    /// `boost` is optional; a missing column or cell means the default uplift.
    pub fn promotions_from_frame(df: &DataFrame) -> Result<PromotionSchedule> {
        let table = Table::new("promotions", df, &["sku_id", "week"])?;
        let ids = table.required_strings("sku_id")?;
        let weeks = table.required_dates("week")?;
        let boosts = table.optional_floats("boost")?;

        let mut schedule = PromotionSchedule::new();
        for i in 0..df.height() {
            schedule.insert(ids[i].clone(), weeks[i], boosts[i]);
        }
        Ok(schedule)
    }

    /// Load exogenous factors
    pub fn load_exogenous<P: AsRef<Path>>(path: P) -> Result<ExogenousTable> {
        Self::exogenous_from_frame(&Self::read_csv(path)?)
    }

    /// Build the exogenous table: every column besides `region` and `week`
    /// is a numeric feature, nulls read as zero. Several rows in the same
    /// (region, week), such as daily readings, are averaged.
    pub fn exogenous_from_frame(df: &DataFrame) -> Result<ExogenousTable> {
        let table = Table::new("exogenous", df, &["region", "week"])?;
        let regions = table.required_strings("region")?;
        let weeks = table.required_dates("week")?;

        let columns: Vec<String> = df
            .get_column_names()
            .into_iter()
            .filter(|c| *c != "region" && *c != "week")
            .map(str::to_string)
            .collect();
        let values = columns
            .iter()
            .map(|c| table.optional_floats(c))
            .collect::<Result<Vec<_>>>()?;

        // rows landing on the same Monday are averaged
        let mut weekly: BTreeMap<(String, NaiveDate), (Vec<f64>, usize)> = BTreeMap::new();
        for i in 0..df.height() {
            let (sums, count) = weekly
                .entry((regions[i].clone(), week_start(weeks[i])))
                .or_insert_with(|| (vec![0.0; columns.len()], 0));
            for (sum, col) in sums.iter_mut().zip(&values) {
                *sum += col[i].unwrap_or(0.0);
            }
            *count += 1;
        }
        let merged = df.height() - weekly.len();
        if merged > 0 {
            warn!(
                rows = df.height(),
                weeks = weekly.len(),
                merged,
                "averaged exogenous rows sharing a (region, week)"
            );
        }

        let mut exogenous = ExogenousTable::new(columns);
        for ((region, week), (sums, count)) in weekly {
            let row = sums.into_iter().map(|sum| sum / count as f64).collect();
            exogenous.insert(region, week, row)?;
        }
        Ok(exogenous)
    }

    /// Load decomposed SKU-week rows (or any raw per-SKU sales table)
    pub fn load_sku_weeks<P: AsRef<Path>>(path: P) -> Result<Vec<SkuWeekRow>> {
        Self::sku_weeks_from_frame(&Self::read_csv(path)?)
    }

    /// Build SKU-week rows from a DataFrame. Dates are kept as read;
    /// calendar alignment happens in feature engineering.
    pub fn sku_weeks_from_frame(df: &DataFrame) -> Result<Vec<SkuWeekRow>> {
        let table = Table::new(
            "sku_weeks",
            df,
            &["warehouse_id", "store_id", "sku_id", "week", "sku_qty"],
        )?;
        let warehouses = table.required_ints("warehouse_id")?;
        let stores = table.required_ints("store_id")?;
        let ids = table.required_strings("sku_id")?;
        validate_sku_ids(ids.iter().map(String::as_str))?;
        let weeks = table.required_dates("week")?;
        let qty = table.required_floats("sku_qty")?;
        let regions = table.optional_strings("region")?;
        let categories = table.optional_strings("category_id")?;
        let category_qty = table.optional_floats("category_qty")?;
        let shares = table.optional_floats("share_norm")?;

        Ok((0..df.height())
            .map(|i| SkuWeekRow {
                warehouse_id: warehouses[i],
                region: regions[i].clone().unwrap_or_default(),
                store_id: stores[i],
                category_id: categories[i].clone().unwrap_or_default(),
                sku_id: ids[i].clone(),
                week: weeks[i],
                category_qty: category_qty[i].unwrap_or(0.0).max(0.0).round() as u64,
                share_norm: shares[i].unwrap_or(0.0),
                sku_qty: qty[i].max(0.0).round() as u64,
            })
            .collect())
    }
}

/// A DataFrame whose required columns have been checked
struct Table<'a> {
    name: &'a str,
    df: &'a DataFrame,
}

impl<'a> Table<'a> {
    fn new(name: &'a str, df: &'a DataFrame, required: &[&str]) -> Result<Self> {
        let present: HashSet<&str> = df.get_column_names().into_iter().collect();
        let missing: Vec<String> = required
            .iter()
            .filter(|c| !present.contains(*c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DemandError::SchemaError {
                table: name.to_string(),
                missing,
            });
        }
        Ok(Self { name, df })
    }

    fn has(&self, column: &str) -> bool {
        self.df.get_column_names().contains(&column)
    }

    fn null_error(&self, column: &str, row: usize) -> DemandError {
        DemandError::DataError(format!(
            "Null value in required column '{}' of {} at row {}",
            column, self.name, row
        ))
    }

    fn strings(&self, column: &str) -> Result<Vec<Option<String>>> {
        let cast = self.df.column(column)?.cast(&DataType::Utf8)?;
        let values = cast
            .utf8()?
            .into_iter()
            .map(|v| {
                v.map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .collect();
        Ok(values)
    }

    fn floats(&self, column: &str) -> Result<Vec<Option<f64>>> {
        let cast = self.df.column(column)?.cast(&DataType::Float64)?;
        let values = cast.f64()?.into_iter().collect();
        Ok(values)
    }

    fn required_strings(&self, column: &str) -> Result<Vec<String>> {
        self.strings(column)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| self.null_error(column, i)))
            .collect()
    }

    fn required_floats(&self, column: &str) -> Result<Vec<f64>> {
        self.floats(column)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| self.null_error(column, i)))
            .collect()
    }

    fn required_ints(&self, column: &str) -> Result<Vec<i64>> {
        Ok(self
            .required_floats(column)?
            .into_iter()
            .map(|v| v.round() as i64)
            .collect())
    }

    fn required_dates(&self, column: &str) -> Result<Vec<NaiveDate>> {
        self.required_strings(column)?
            .iter()
            .map(|s| parse_date(s))
            .collect()
    }

    fn optional_strings(&self, column: &str) -> Result<Vec<Option<String>>> {
        if self.has(column) {
            self.strings(column)
        } else {
            Ok(vec![None; self.df.height()])
        }
    }

    fn optional_floats(&self, column: &str) -> Result<Vec<Option<f64>>> {
        if self.has(column) {
            self.floats(column)
        } else {
            Ok(vec![None; self.df.height()])
        }
    }

    fn optional_dates(&self, column: &str) -> Result<Vec<Option<NaiveDate>>> {
        self.optional_strings(column)?
            .into_iter()
            .map(|v| v.map(|s| parse_date(&s)).transpose())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[rstest]
    #[case(" TV ", "tv")]
    #[case("Air_Con-ditioner", "airconditioner")]
    #[case("Kimchi Fridge", "kimchifridge")]
    fn category_keys_normalize(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_category_key(raw), expected);
    }

    #[rstest]
    #[case("TV-55-A1", true)]
    #[case("SKU001", true)]
    #[case("sku001", false)]
    #[case("TV 55", false)]
    #[case("", false)]
    fn sku_id_format(#[case] id: &str, #[case] valid: bool) {
        assert_eq!(is_valid_sku_id(id), valid);
    }

    #[test]
    fn catalog_normalizes_shares_per_category() {
        let catalog = Catalog::new(vec![
            SkuRecord::new("TV-1", "TV", 7.0),
            SkuRecord::new("TV-2", "tv", 3.0),
            SkuRecord::new("WM-1", "Washer", 0.0),
            SkuRecord::new("WM-2", "Washer", 0.0),
        ])
        .unwrap();
        let tv = catalog.category("T V").unwrap();
        assert_relative_eq!(tv[0].base_share, 0.7);
        assert_relative_eq!(tv[1].base_share, 0.3);
        let washer = catalog.category("washer").unwrap();
        assert_relative_eq!(washer[0].base_share, 0.5);
    }

    #[test]
    fn catalog_rejects_bad_ids_and_duplicates() {
        let err = Catalog::new(vec![SkuRecord::new("tv-1", "TV", 1.0)]).unwrap_err();
        assert!(matches!(err, DemandError::InvalidSkuId { count: 1, .. }));
        let err = Catalog::new(vec![
            SkuRecord::new("TV-1", "TV", 1.0),
            SkuRecord::new("TV-1", "TV", 1.0),
        ])
        .unwrap_err();
        assert!(matches!(err, DemandError::ValidationError(_)));
    }

    #[test]
    fn coverage_reports_unknown_categories() {
        let catalog = Catalog::new(vec![SkuRecord::new("TV-1", "TV", 1.0)]).unwrap();
        let row = |category: &str| CategoryWeek {
            warehouse_id: 1,
            region: "hq".to_string(),
            store_id: 1,
            category_id: category.to_string(),
            week: d(2024, 1, 1),
            demand_qty: 10,
        };
        assert!(catalog.check_coverage(&[row("tv")]).is_ok());
        let err = catalog
            .check_coverage(&[row("tv"), row("Dryer"), row("Dryer")])
            .unwrap_err();
        match err {
            DemandError::MissingCatalogCategory(missing) => assert_eq!(missing, vec!["Dryer"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn excluded_categories_are_dropped() {
        let row = |category: &str| CategoryWeek {
            warehouse_id: 1,
            region: "hq".to_string(),
            store_id: 1,
            category_id: category.to_string(),
            week: d(2024, 1, 1),
            demand_qty: 10,
        };
        let kept = filter_excluded_categories(
            vec![row("TV"), row("Misc"), row("ETC")],
            &["misc".to_string(), "etc".to_string()],
        );
        assert_eq!(kept, vec![row("TV")]);
    }

    #[test]
    fn catalog_frame_requires_columns() {
        let df = DataFrame::new(vec![
            Series::new("sku_id", &["TV-1"]),
            Series::new("brand", &["Acme"]),
        ])
        .unwrap();
        let err = DataLoader::catalog_from_frame(&df).unwrap_err();
        match err {
            DemandError::SchemaError { table, missing } => {
                assert_eq!(table, "catalog");
                assert_eq!(missing, vec!["category_id", "base_share"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn catalog_frame_reads_optional_columns() {
        let df = DataFrame::new(vec![
            Series::new("sku_id", &["TV-1", "TV-2"]),
            Series::new("category_id", &["TV", "TV"]),
            Series::new("base_share", &[0.6, 0.4]),
            Series::new("launch_date", &[Some("2024-02-05"), None]),
            Series::new("size", &[65.0, 50.0]),
        ])
        .unwrap();
        let catalog = DataLoader::catalog_from_frame(&df).unwrap();
        let first = catalog.get("TV-1").unwrap();
        assert_eq!(first.launch_date, Some(d(2024, 2, 5)));
        assert_eq!(first.size, Some(65.0));
        assert_eq!(catalog.get("TV-2").unwrap().launch_date, None);
        assert_eq!(first.price_tier, None);
    }

    #[test]
    fn promotion_multiplier_uses_default_boost() {
        let mut schedule = PromotionSchedule::new();
        schedule.insert("TV-1", d(2024, 1, 3), None);
        schedule.insert("TV-2", d(2024, 1, 1), Some(0.5));
        assert_relative_eq!(schedule.multiplier("TV-1", d(2024, 1, 1), 0.2), 1.2);
        assert_relative_eq!(schedule.multiplier("TV-2", d(2024, 1, 1), 0.2), 1.5);
        assert_relative_eq!(schedule.multiplier("TV-2", d(2024, 1, 8), 0.2), 1.0);
    }

    #[test]
    fn exogenous_last_known_looks_backwards() {
        let mut table = ExogenousTable::new(vec!["cdd".to_string()]);
        table.insert("hq", d(2024, 1, 1), vec![1.0]).unwrap();
        table.insert("hq", d(2024, 1, 15), vec![3.0]).unwrap();
        table.insert("south", d(2024, 1, 22), vec![9.0]).unwrap();
        assert_eq!(table.get("hq", d(2024, 1, 8)), None);
        assert_eq!(table.last_known("hq", d(2024, 1, 8)), Some(&[1.0][..]));
        assert_eq!(table.last_known("hq", d(2024, 3, 4)), Some(&[3.0][..]));
        assert_eq!(table.last_known("south", d(2024, 1, 1)), None);
        assert!(table.insert("hq", d(2024, 1, 1), vec![]).is_err());
    }
}
