//! SKU share decomposition
//!
//! Splits each (warehouse, region, store, category) weekly total across the
//! category's SKUs. Every such group is an independent [`ShareStream`] with
//! its own log-share trajectory and its own random stream, so groups can be
//! processed in parallel without changing the output.
//!
//! One step of a stream, for week `t`:
//!
//! 1. random walk on log-shares towards `log(base_share)`, then softmax
//! 2. multiplicative micro-noise `1 + U(-1, 1) * noise_scale`
//! 3. seasonal tilt `1 + k * s(t) * p_i`
//! 4. random and scheduled promotion uplifts
//! 5. lifecycle gate
//! 6. renormalize, with explicit fallbacks
//! 7. largest-remainder integer allocation of the category total

use crate::calendar::{week_of_year, week_start, weeks_between};
use crate::config::{
    CategoryProfile, DecompositionConfig, LifecycleConfig, LifecycleCurve, PreferenceConfig,
    UnlaunchedPolicy,
};
use crate::data::{
    filter_excluded_categories, normalize_category_key, Catalog, CategoryWeek, PromotionSchedule,
    SkuRecord, SkuWeekRow, MIN_BASE_SHARE,
};
use crate::error::{DemandError, Result};
use crate::seed::Seed;
use chrono::NaiveDate;
use demand_math::{largest_remainder, normalize, softmax, SeasonalProfile};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle multiplier of a SKU in a given week.
///
/// Zero before launch and from the end-of-life date on; 1.0 for SKUs with
/// no launch date. Launch dates snap to their Monday, so a SKU launched
/// mid-week sells in that week.
pub fn lifecycle_multiplier(sku: &SkuRecord, week: NaiveDate, config: &LifecycleConfig) -> f64 {
    if let Some(eol) = sku.eol_date {
        if week >= eol {
            return 0.0;
        }
    }
    let launch = match sku.launch_date {
        Some(launch) => week_start(launch),
        None => return 1.0,
    };
    let weeks = weeks_between(launch, week);
    if weeks < 0 {
        return 0.0;
    }

    let ramp_weeks = f64::from(config.ramp_weeks.max(1));
    let weeks = weeks as f64;
    let ramp = ((weeks + 1.0) / ramp_weeks).min(1.0);
    let decay_rate = std::f64::consts::LN_2 / config.half_life_weeks;
    let decay = (-decay_rate * (weeks - ramp_weeks).max(0.0)).exp();

    match config.curve {
        LifecycleCurve::RampDecayFloor => ramp * (config.floor + (1.0 - config.floor) * decay),
        LifecycleCurve::Blended => ramp * decay + (1.0 - ramp) * config.floor,
    }
}

/// Attribute preference `p_i` of a SKU, clipped to `[-limit, limit]`
pub fn attribute_preference(sku: &SkuRecord, size_sensitive: bool, config: &PreferenceConfig) -> f64 {
    let mut p = 0.0;
    match sku.price_tier.as_deref().map(str::to_lowercase).as_deref() {
        Some("high") | Some("premium") => p += config.premium_bonus,
        Some("low") | Some("budget") => p += config.budget_penalty,
        _ => {}
    }
    if sku
        .energy_grade
        .as_deref()
        .map_or(false, |grade| grade.contains('1'))
    {
        p += config.efficient_bonus;
    }
    if size_sensitive {
        if let Some(size) = sku.size {
            let mut thresholds = config.size_bonuses.clone();
            thresholds.sort_by(|a, b| b.min_size.total_cmp(&a.min_size));
            if let Some(hit) = thresholds.iter().find(|t| size >= t.min_size) {
                p += hit.bonus;
            }
        }
    }
    let limit = config.limit.min(1.0);
    p.clamp(-limit, limit)
}

/// Identity of one decomposition stream
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    /// Warehouse identifier
    pub warehouse_id: i64,
    /// Region
    pub region: String,
    /// Store identifier
    pub store_id: i64,
    /// Normalized category key
    pub category: String,
}

impl StreamKey {
    /// Key of the stream a category-week row belongs to
    pub fn of(row: &CategoryWeek) -> Self {
        Self {
            warehouse_id: row.warehouse_id,
            region: row.region.clone(),
            store_id: row.store_id,
            category: normalize_category_key(&row.category_id),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.warehouse_id, self.region, self.store_id, self.category
        )
    }
}

/// Lifecycle of a [`ShareStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, no week processed
    Uninitialized,
    /// At least one week processed; holds the latest week
    Running(NaiveDate),
    /// Finished; no further weeks accepted
    Done,
}

/// Counters of one finished stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Weeks processed
    pub weeks: usize,
    /// Weeks where no SKU was live and nothing was allocated
    pub zero_allocated_weeks: usize,
    /// Category demand not allocated because of those weeks
    pub unmet_qty: u64,
}

/// Share state of one (warehouse, region, store, category) stream
#[derive(Debug)]
pub struct ShareStream<'a> {
    key: StreamKey,
    category_id: String,
    skus: Vec<&'a SkuRecord>,
    base: Vec<f64>,
    log_base: Vec<f64>,
    logits: Vec<f64>,
    preference: Vec<f64>,
    tilt: &'a SeasonalProfile,
    config: &'a DecompositionConfig,
    promotions: Option<&'a PromotionSchedule>,
    rng: ChaCha8Rng,
    innovation: Normal<f64>,
    jitter: Uniform<f64>,
    promo_draw: Bernoulli,
    state: StreamState,
    summary: StreamSummary,
}

impl<'a> ShareStream<'a> {
    /// Start a stream in the `Uninitialized` state with log-shares at base
    pub fn new(
        key: StreamKey,
        category_id: impl Into<String>,
        skus: Vec<&'a SkuRecord>,
        profile: &'a CategoryProfile,
        config: &'a DecompositionConfig,
        promotions: Option<&'a PromotionSchedule>,
        seed: Seed,
    ) -> Result<Self> {
        if skus.is_empty() {
            return Err(DemandError::MissingCatalogCategory(vec![key.category.clone()]));
        }
        let innovation = Normal::new(0.0, config.rw_sigma)
            .map_err(|e| DemandError::InvalidParameter(format!("rw_sigma: {}", e)))?;
        let promo_draw = Bernoulli::new(config.promotion.rate)
            .map_err(|e| DemandError::InvalidParameter(format!("promotion rate: {}", e)))?;

        let base: Vec<f64> = skus.iter().map(|s| s.base_share).collect();
        let log_base: Vec<f64> = base.iter().map(|b| b.max(MIN_BASE_SHARE).ln()).collect();
        let preference = skus
            .iter()
            .map(|s| attribute_preference(s, profile.size_sensitive, &config.preference))
            .collect();

        Ok(Self {
            key,
            category_id: category_id.into(),
            skus,
            base,
            logits: log_base.clone(),
            log_base,
            preference,
            tilt: &profile.tilt,
            config,
            promotions,
            rng: seed.to_rng(),
            innovation,
            jitter: Uniform::new_inclusive(-1.0, 1.0),
            promo_draw,
            state: StreamState::Uninitialized,
            summary: StreamSummary::default(),
        })
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Stream identity
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Softmax of the current log-shares
    pub fn raw_shares(&self) -> Vec<f64> {
        softmax(&self.logits)
    }

    /// Process one week and return one row per SKU, in catalog order.
    ///
    /// Weeks must be strictly increasing; a finished stream accepts nothing.
    pub fn step(&mut self, week: NaiveDate, category_qty: u64) -> Result<Vec<SkuWeekRow>> {
        match self.state {
            StreamState::Done => {
                return Err(DemandError::StreamError(format!(
                    "stream {} is done, cannot process week {}",
                    self.key, week
                )))
            }
            StreamState::Running(last) if week <= last => {
                return Err(DemandError::StreamError(format!(
                    "stream {} received week {} after {}",
                    self.key, week, last
                )))
            }
            _ => {}
        }

        let rho = self.config.rho;
        for (logit, log_base) in self.logits.iter_mut().zip(&self.log_base) {
            *logit = rho * *logit + (1.0 - rho) * log_base + self.innovation.sample(&mut self.rng);
        }
        let mut shares = softmax(&self.logits);

        let noise_scale = self.config.noise_scale;
        for share in shares.iter_mut() {
            *share *= 1.0 + self.jitter.sample(&mut self.rng) * noise_scale;
        }

        let season = self.tilt.index_at(week_of_year(week));
        let k = self.config.tilt_strength;
        for (share, p) in shares.iter_mut().zip(&self.preference) {
            *share *= 1.0 + k * season * p;
        }

        let promo = &self.config.promotion;
        for (share, sku) in shares.iter_mut().zip(&self.skus) {
            if self.promo_draw.sample(&mut self.rng) {
                *share *= 1.0 + promo.strength;
            }
            if let Some(schedule) = self.promotions {
                *share *= schedule.multiplier(&sku.sku_id, week, promo.default_boost);
            }
        }

        let life: Vec<f64> = self
            .skus
            .iter()
            .map(|sku| lifecycle_multiplier(sku, week, &self.config.lifecycle))
            .collect();
        for (share, l) in shares.iter_mut().zip(&life) {
            *share = (*share * l).max(0.0);
        }

        self.state = StreamState::Running(week);
        self.summary.weeks += 1;

        let any_live = life.iter().any(|l| *l > 0.0);
        if !any_live {
            match self.config.unlaunched {
                UnlaunchedPolicy::ZeroAllocation => {
                    debug!(stream = %self.key, %week, category_qty, "no live SKU, allocating zero");
                    self.summary.zero_allocated_weeks += 1;
                    self.summary.unmet_qty += category_qty;
                    return Ok(self.rows(week, category_qty, &vec![0.0; shares.len()], None));
                }
                UnlaunchedPolicy::BaseShareFallback => shares = self.base.clone(),
            }
        } else if !normalize(&mut shares) {
            // collapsed: base shares over the live SKUs
            shares = self
                .base
                .iter()
                .zip(&life)
                .map(|(b, l)| if *l > 0.0 { b.max(MIN_BASE_SHARE) } else { 0.0 })
                .collect();
            normalize(&mut shares);
        }

        let parts = largest_remainder(category_qty, &shares)?;
        Ok(self.rows(week, category_qty, &shares, Some(&parts)))
    }

    fn rows(
        &self,
        week: NaiveDate,
        category_qty: u64,
        shares: &[f64],
        parts: Option<&[u64]>,
    ) -> Vec<SkuWeekRow> {
        self.skus
            .iter()
            .enumerate()
            .map(|(i, sku)| SkuWeekRow {
                warehouse_id: self.key.warehouse_id,
                region: self.key.region.clone(),
                store_id: self.key.store_id,
                category_id: self.category_id.clone(),
                sku_id: sku.sku_id.clone(),
                week,
                category_qty,
                share_norm: shares[i],
                sku_qty: parts.map_or(0, |p| p[i]),
            })
            .collect()
    }

    /// Close the stream and return its counters
    pub fn finish(&mut self) -> Result<StreamSummary> {
        if self.state == StreamState::Done {
            return Err(DemandError::StreamError(format!(
                "stream {} finished twice",
                self.key
            )));
        }
        self.state = StreamState::Done;
        Ok(self.summary)
    }
}

/// Totals over all streams of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecompositionReport {
    /// Streams processed
    pub streams: usize,
    /// Rows produced
    pub rows: usize,
    /// Stream-weeks with no live SKU
    pub zero_allocated_weeks: usize,
    /// Category demand left unallocated in those weeks
    pub unmet_qty: u64,
}

/// Output of [`DecompositionEngine::run`]
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Rows ordered by stream key, week, then catalog order
    pub rows: Vec<SkuWeekRow>,
    /// Run counters
    pub report: DecompositionReport,
}

/// Runs one [`ShareStream`] per (warehouse, region, store, category) group
#[derive(Debug)]
pub struct DecompositionEngine<'a> {
    config: &'a DecompositionConfig,
    catalog: &'a Catalog,
    profiles: HashMap<String, &'a CategoryProfile>,
    default_profile: CategoryProfile,
    promotions: Option<&'a PromotionSchedule>,
}

impl<'a> DecompositionEngine<'a> {
    /// Create an engine over a validated catalog
    pub fn new(config: &'a DecompositionConfig, catalog: &'a Catalog) -> Self {
        Self {
            config,
            catalog,
            profiles: HashMap::new(),
            default_profile: CategoryProfile::default(),
            promotions: None,
        }
    }

    /// Category profiles supplying the tilt curve and size sensitivity.
    /// Categories without a profile use [`CategoryProfile::default`].
    pub fn with_profiles(mut self, profiles: &'a BTreeMap<String, CategoryProfile>) -> Self {
        self.profiles = profiles
            .iter()
            .map(|(name, profile)| (normalize_category_key(name), profile))
            .collect();
        self
    }

    /// Scheduled promotions
    pub fn with_promotions(mut self, promotions: &'a PromotionSchedule) -> Self {
        self.promotions = Some(promotions);
        self
    }

    fn profile(&self, category: &str) -> &CategoryProfile {
        self.profiles
            .get(category)
            .copied()
            .unwrap_or(&self.default_profile)
    }

    /// Open the stream for one group
    pub fn stream(&self, key: StreamKey, category_id: &str, seed: Seed) -> Result<ShareStream<'_>> {
        let skus = self
            .catalog
            .category(&key.category)
            .ok_or_else(|| DemandError::MissingCatalogCategory(vec![category_id.to_string()]))?;
        let profile = self.profile(&key.category);
        let stream_seed = seed.derive(&key.to_string());
        ShareStream::new(
            key,
            category_id,
            skus,
            profile,
            self.config,
            self.promotions,
            stream_seed,
        )
    }

    /// Decompose a whole category series
    pub fn run(&self, series: &[CategoryWeek], seed: Seed) -> Result<Decomposition> {
        let series = filter_excluded_categories(series.to_vec(), &self.config.excluded_categories);
        self.catalog.check_coverage(&series)?;

        let mut groups: BTreeMap<StreamKey, (String, BTreeMap<NaiveDate, u64>)> = BTreeMap::new();
        for row in &series {
            let (_, weeks) = groups
                .entry(StreamKey::of(row))
                .or_insert_with(|| (row.category_id.clone(), BTreeMap::new()));
            if weeks.insert(row.week, row.demand_qty).is_some() {
                return Err(DemandError::ValidationError(format!(
                    "Duplicate category-week {} {} for warehouse {} store {}",
                    row.category_id, row.week, row.warehouse_id, row.store_id
                )));
            }
        }

        let outputs = groups
            .into_par_iter()
            .map(|(key, (category_id, weeks))| {
                let mut stream = self.stream(key, &category_id, seed)?;
                let mut rows = Vec::with_capacity(weeks.len() * stream.skus.len());
                for (week, qty) in weeks {
                    rows.extend(stream.step(week, qty)?);
                }
                let summary = stream.finish()?;
                if summary.zero_allocated_weeks > 0 {
                    warn!(
                        stream = %stream.key(),
                        weeks = summary.zero_allocated_weeks,
                        unmet_qty = summary.unmet_qty,
                        "weeks with no launched SKU were allocated zero"
                    );
                }
                Ok((rows, summary))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = DecompositionReport {
            streams: outputs.len(),
            ..DecompositionReport::default()
        };
        let mut rows = Vec::new();
        for (stream_rows, summary) in outputs {
            report.zero_allocated_weeks += summary.zero_allocated_weeks;
            report.unmet_qty += summary.unmet_qty;
            rows.extend(stream_rows);
        }
        report.rows = rows.len();

        info!(
            streams = report.streams,
            rows = report.rows,
            zero_weeks = report.zero_allocated_weeks,
            "decomposition finished"
        );
        Ok(Decomposition { rows, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SizeBonus;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[rstest]
    #[case(d(2024, 1, 1), 0.0)]
    #[case(d(2024, 1, 8), 0.1)]
    #[case(d(2024, 3, 18), 1.0)]
    fn lifecycle_ramps_from_launch(#[case] week: NaiveDate, #[case] expected: f64) {
        let sku = SkuRecord::new("TV-1", "TV", 1.0).with_launch_date(d(2024, 1, 10));
        let config = LifecycleConfig::default();
        assert_relative_eq!(lifecycle_multiplier(&sku, week, &config), expected, epsilon = 1e-12);
    }

    #[test]
    fn lifecycle_decays_towards_floor() {
        let sku = SkuRecord::new("TV-1", "TV", 1.0).with_launch_date(d(2020, 1, 6));
        let config = LifecycleConfig::default();
        let late = lifecycle_multiplier(&sku, d(2040, 1, 2), &config);
        assert!(late > config.floor && late < config.floor + 0.01);

        let blended = LifecycleConfig {
            curve: LifecycleCurve::Blended,
            ..LifecycleConfig::default()
        };
        let mature = lifecycle_multiplier(&sku, d(2040, 1, 2), &blended);
        assert!(mature < 0.01);
    }

    #[test]
    fn lifecycle_respects_eol_and_missing_launch() {
        let sku = SkuRecord::new("TV-1", "TV", 1.0).with_eol_date(d(2024, 6, 3));
        let config = LifecycleConfig::default();
        assert_eq!(lifecycle_multiplier(&sku, d(2024, 5, 27), &config), 1.0);
        assert_eq!(lifecycle_multiplier(&sku, d(2024, 6, 3), &config), 0.0);
    }

    #[test]
    fn preference_combines_attributes() {
        let config = PreferenceConfig::default();
        let premium = SkuRecord::new("TV-1", "TV", 1.0)
            .with_price_tier("High")
            .with_energy_grade("1st")
            .with_size(75.0);
        assert_relative_eq!(attribute_preference(&premium, true, &config), 0.8);
        assert_relative_eq!(attribute_preference(&premium, false, &config), 0.5);

        let budget = SkuRecord::new("TV-2", "TV", 1.0)
            .with_price_tier("low")
            .with_size(55.0);
        assert_relative_eq!(attribute_preference(&budget, true, &config), -0.05);

        let custom = PreferenceConfig {
            size_bonuses: vec![SizeBonus {
                min_size: 10.0,
                bonus: 5.0,
            }],
            ..PreferenceConfig::default()
        };
        assert_relative_eq!(attribute_preference(&budget, true, &custom), 0.8);
    }

    fn still_config() -> DecompositionConfig {
        let mut config = DecompositionConfig::default();
        config.rho = 1.0;
        config.rw_sigma = 0.0;
        config.noise_scale = 0.0;
        config.promotion.rate = 0.0;
        config
    }

    fn key() -> StreamKey {
        StreamKey {
            warehouse_id: 1,
            region: "hq".to_string(),
            store_id: 1,
            category: "tv".to_string(),
        }
    }

    #[test]
    fn stream_rejects_out_of_order_and_finished_use() {
        let catalog = Catalog::new(vec![SkuRecord::new("TV-1", "TV", 1.0)]).unwrap();
        let config = still_config();
        let engine = DecompositionEngine::new(&config, &catalog);
        let mut stream = engine.stream(key(), "TV", Seed::new(1)).unwrap();
        assert_eq!(stream.state(), StreamState::Uninitialized);

        stream.step(d(2024, 1, 8), 10).unwrap();
        assert_eq!(stream.state(), StreamState::Running(d(2024, 1, 8)));
        let err = stream.step(d(2024, 1, 8), 10).unwrap_err();
        assert!(matches!(err, DemandError::StreamError(_)));

        stream.finish().unwrap();
        assert_eq!(stream.state(), StreamState::Done);
        assert!(stream.step(d(2024, 1, 15), 10).is_err());
        assert!(stream.finish().is_err());
    }

    #[test]
    fn unlaunched_weeks_allocate_zero_or_fall_back() {
        let catalog = Catalog::new(vec![
            SkuRecord::new("TV-1", "TV", 0.5).with_launch_date(d(2024, 2, 5)),
            SkuRecord::new("TV-2", "TV", 0.5).with_launch_date(d(2024, 2, 5)),
        ])
        .unwrap();
        let config = still_config();
        let engine = DecompositionEngine::new(&config, &catalog);
        let mut stream = engine.stream(key(), "TV", Seed::new(1)).unwrap();
        let rows = stream.step(d(2024, 1, 1), 40).unwrap();
        assert!(rows.iter().all(|r| r.sku_qty == 0 && r.category_qty == 40));
        let summary = stream.finish().unwrap();
        assert_eq!(summary.zero_allocated_weeks, 1);
        assert_eq!(summary.unmet_qty, 40);

        let mut fallback = still_config();
        fallback.unlaunched = UnlaunchedPolicy::BaseShareFallback;
        let engine = DecompositionEngine::new(&fallback, &catalog);
        let mut stream = engine.stream(key(), "TV", Seed::new(1)).unwrap();
        let rows = stream.step(d(2024, 1, 1), 40).unwrap();
        assert_eq!(rows.iter().map(|r| r.sku_qty).sum::<u64>(), 40);
    }

    #[test]
    fn raw_shares_stay_normalized_under_noise() {
        let catalog = Catalog::new(vec![
            SkuRecord::new("TV-1", "TV", 0.6),
            SkuRecord::new("TV-2", "TV", 0.3),
            SkuRecord::new("TV-3", "TV", 0.1),
        ])
        .unwrap();
        let config = DecompositionConfig {
            rw_sigma: 0.5,
            ..DecompositionConfig::default()
        };
        let engine = DecompositionEngine::new(&config, &catalog);
        let mut stream = engine.stream(key(), "TV", Seed::new(3)).unwrap();
        let mut week = d(2024, 1, 1);
        for _ in 0..30 {
            let rows = stream.step(week, 123).unwrap();
            assert_relative_eq!(stream.raw_shares().iter().sum::<f64>(), 1.0, epsilon = 1e-6);
            assert_relative_eq!(rows.iter().map(|r| r.share_norm).sum::<f64>(), 1.0, epsilon = 1e-6);
            assert_eq!(rows.iter().map(|r| r.sku_qty).sum::<u64>(), 123);
            week += chrono::Duration::weeks(1);
        }
    }
}
