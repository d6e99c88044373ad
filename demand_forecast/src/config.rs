//! Pipeline configuration
//!
//! One [`PipelineConfig`] is threaded through every component. It can be
//! built in code from the `Default` impls or read from TOML; every section
//! is optional in the file and falls back to the defaults below. Dates in
//! TOML are quoted strings (`start = "2021-01-04"`).

use crate::data::normalize_category_key;
use crate::error::{DemandError, Result};
use chrono::NaiveDate;
use demand_math::{Combine, GaussianBump, SeasonalProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master seed; every random stream is derived from it
    pub seed: u64,
    /// Category demand synthesis
    pub generator: GeneratorConfig,
    /// Synthetic weather
    pub weather: WeatherConfig,
    /// SKU share decomposition
    pub decomposition: DecompositionConfig,
    /// Virtual store split
    pub stores: StoreSplitConfig,
    /// Feature engineering
    pub features: FeatureConfig,
    /// Regressor fitting
    pub training: TrainingConfig,
    /// Recursive forecasting
    pub forecast: ForecastConfig,
    /// Per-category profiles keyed by category id
    pub categories: BTreeMap<String, CategoryProfile>,
    /// Input and output locations (binary only)
    pub paths: PathsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            generator: GeneratorConfig::default(),
            weather: WeatherConfig::default(),
            decomposition: DecompositionConfig::default(),
            stores: StoreSplitConfig::default(),
            features: FeatureConfig::default(),
            training: TrainingConfig::default(),
            forecast: ForecastConfig::default(),
            categories: BTreeMap::new(),
            paths: PathsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML configuration file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up the profile for a category, matching on the normalized key
    pub fn profile(&self, category: &str) -> Option<&CategoryProfile> {
        let key = normalize_category_key(category);
        self.categories
            .iter()
            .find(|(name, _)| normalize_category_key(name) == key)
            .map(|(_, profile)| profile)
    }

    /// Check every section for out-of-range parameters
    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;
        self.decomposition.validate()?;
        self.stores.validate()?;
        self.features.validate()?;
        self.training.validate()?;
        self.forecast.validate()?;
        for (name, profile) in &self.categories {
            profile
                .validate()
                .map_err(|e| invalid(format!("category '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> DemandError {
    DemandError::InvalidParameter(msg.into())
}

/// Category demand generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// First week of the generated range
    pub start: NaiveDate,
    /// Last week of the generated range (inclusive)
    pub end: NaiveDate,
    /// Year with trend factor 1.0; defaults to the year of `start`
    pub base_year: Option<i32>,
    /// Standard deviation of the multiplicative N(1, sigma) noise
    pub noise_sigma: f64,
    /// Warehouse the generated series belongs to
    pub warehouse_id: i64,
    /// Region the generated series belongs to
    pub region: String,
    /// Store the generated series belongs to
    pub store_id: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2021, 1, 4).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2025, 12, 29).unwrap_or_default(),
            base_year: None,
            noise_sigma: 0.15,
            warehouse_id: 1,
            region: "hq".to_string(),
            store_id: 1,
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> Result<()> {
        if self.end < self.start {
            return Err(invalid("generator.end must not precede generator.start"));
        }
        if !(self.noise_sigma >= 0.0) {
            return Err(invalid("generator.noise_sigma must be non-negative"));
        }
        Ok(())
    }
}

/// Synthetic weather settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Regions to generate weather for
    pub regions: Vec<String>,
    /// Annual mean temperature
    pub mean_temp_c: f64,
    /// Half the summer/winter swing
    pub temp_amplitude_c: f64,
    /// Day of year with the warmest expected temperature
    pub temp_peak_day: f64,
    /// Daily temperature noise
    pub temp_noise_c: f64,
    /// Mean daily precipitation
    pub precip_base_mm: f64,
    /// Seasonal precipitation swing
    pub precip_amplitude_mm: f64,
    /// Day of year with the wettest expected weather
    pub precip_peak_day: f64,
    /// Cooling degree-day base
    pub cooling_base_c: f64,
    /// Heating degree-day base
    pub heating_base_c: f64,
    /// Daily temperature that flags a heat wave
    pub heat_wave_c: f64,
    /// Daily temperature that flags a cold wave
    pub cold_wave_c: f64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            regions: vec!["hq".to_string()],
            mean_temp_c: 15.0,
            temp_amplitude_c: 10.0,
            temp_peak_day: 200.0,
            temp_noise_c: 1.5,
            precip_base_mm: 3.0,
            precip_amplitude_mm: 2.0,
            precip_peak_day: 196.0,
            cooling_base_c: 24.0,
            heating_base_c: 18.0,
            heat_wave_c: 33.0,
            cold_wave_c: -8.0,
        }
    }
}

/// Shape of the SKU lifecycle multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleCurve {
    /// `ramp * (floor + (1 - floor) * decay)`: zero before launch, positive from launch week
    #[default]
    RampDecayFloor,
    /// `ramp * decay + (1 - ramp) * floor`: the floor also applies during the ramp
    Blended,
}

/// What to do in a week where no SKU of the category has launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlaunchedPolicy {
    /// Allocate nothing; the category total for that week is unmet by the stream
    #[default]
    ZeroAllocation,
    /// Allocate by base share as if every SKU were live
    BaseShareFallback,
}

/// Lifecycle multiplier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Weeks to ramp from launch to full strength
    pub ramp_weeks: u32,
    /// Half-life of the post-ramp decay, in weeks
    pub half_life_weeks: f64,
    /// Level the decay settles towards
    pub floor: f64,
    /// Curve shape
    pub curve: LifecycleCurve,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ramp_weeks: 10,
            half_life_weeks: 90.0,
            floor: 0.1,
            curve: LifecycleCurve::RampDecayFloor,
        }
    }
}

/// Promotion effect settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Probability of a random promotion per SKU-week
    pub rate: f64,
    /// Share uplift of a random promotion
    pub strength: f64,
    /// Uplift used when a scheduled promotion has no boost
    pub default_boost: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            rate: 0.05,
            strength: 0.25,
            default_boost: 0.20,
        }
    }
}

/// Size threshold that earns a preference bonus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeBonus {
    /// Minimum size (inches, litres, ...) for the bonus
    pub min_size: f64,
    /// Preference added
    pub bonus: f64,
}

/// SKU attribute preference settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceConfig {
    /// Added for `price_tier = high`
    pub premium_bonus: f64,
    /// Added for `price_tier = low`
    pub budget_penalty: f64,
    /// Added when the energy grade contains "1"
    pub efficient_bonus: f64,
    /// Size thresholds, checked largest first, for size-sensitive categories
    pub size_bonuses: Vec<SizeBonus>,
    /// Preference is clipped to `[-limit, limit]`
    pub limit: f64,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            premium_bonus: 0.3,
            budget_penalty: -0.2,
            efficient_bonus: 0.2,
            size_bonuses: vec![
                SizeBonus {
                    min_size: 65.0,
                    bonus: 0.3,
                },
                SizeBonus {
                    min_size: 55.0,
                    bonus: 0.15,
                },
            ],
            limit: 0.8,
        }
    }
}

/// SKU share decomposition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Log-share persistence, in (0, 1]
    pub rho: f64,
    /// Random-walk innovation standard deviation
    pub rw_sigma: f64,
    /// Micro-noise half-width
    pub noise_scale: f64,
    /// Seasonal tilt strength `k`
    pub tilt_strength: f64,
    /// Promotion effects
    pub promotion: PromotionConfig,
    /// Lifecycle multiplier
    pub lifecycle: LifecycleConfig,
    /// Attribute preference
    pub preference: PreferenceConfig,
    /// Handling of weeks with no launched SKU
    pub unlaunched: UnlaunchedPolicy,
    /// Category keys dropped from the demand series before decomposition
    pub excluded_categories: Vec<String>,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            rho: 0.9,
            rw_sigma: 0.12,
            noise_scale: 0.03,
            tilt_strength: 0.35,
            promotion: PromotionConfig::default(),
            lifecycle: LifecycleConfig::default(),
            preference: PreferenceConfig::default(),
            unlaunched: UnlaunchedPolicy::ZeroAllocation,
            excluded_categories: vec![
                String::new(),
                "etc".to_string(),
                "misc".to_string(),
                "other".to_string(),
                "others".to_string(),
            ],
        }
    }
}

impl DecompositionConfig {
    fn validate(&self) -> Result<()> {
        if !(self.rho > 0.0 && self.rho <= 1.0) {
            return Err(invalid(format!(
                "decomposition.rho must be in (0, 1], got {}",
                self.rho
            )));
        }
        if !(self.rw_sigma >= 0.0) {
            return Err(invalid("decomposition.rw_sigma must be non-negative"));
        }
        if !(0.0..1.0).contains(&self.noise_scale) {
            return Err(invalid("decomposition.noise_scale must be in [0, 1)"));
        }
        if !(self.tilt_strength >= 0.0) {
            return Err(invalid("decomposition.tilt_strength must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.promotion.rate) {
            return Err(invalid("decomposition.promotion.rate must be in [0, 1]"));
        }
        if self.promotion.strength < 0.0 || self.promotion.default_boost < -1.0 {
            return Err(invalid("decomposition.promotion uplift out of range"));
        }
        if self.lifecycle.ramp_weeks == 0 {
            return Err(invalid("decomposition.lifecycle.ramp_weeks must be at least 1"));
        }
        if !(self.lifecycle.half_life_weeks > 0.0) {
            return Err(invalid(
                "decomposition.lifecycle.half_life_weeks must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.lifecycle.floor) {
            return Err(invalid("decomposition.lifecycle.floor must be in [0, 1]"));
        }
        if !(self.preference.limit >= 0.0) {
            return Err(invalid("decomposition.preference.limit must be non-negative"));
        }
        Ok(())
    }
}

/// Virtual store split settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSplitConfig {
    /// Whether the pipeline splits warehouse series into virtual stores
    pub enabled: bool,
    /// Number of virtual stores
    pub stores: usize,
    /// First virtual store id
    pub store_base: i64,
    /// Per-week multiplicative drift on the store weights
    pub drift_scale: f64,
}

impl Default for StoreSplitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stores: 5,
            store_base: 1001,
            drift_scale: 0.05,
        }
    }
}

impl StoreSplitConfig {
    fn validate(&self) -> Result<()> {
        if self.stores == 0 {
            return Err(invalid("stores.stores must be at least 1"));
        }
        if !(self.drift_scale >= 0.0) {
            return Err(invalid("stores.drift_scale must be non-negative"));
        }
        Ok(())
    }
}

/// Feature engineering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Lag offsets in weeks
    pub lags: Vec<usize>,
    /// Moving-average windows
    pub moving_averages: Vec<usize>,
    /// Rolling standard deviation windows
    pub rolling_std: Vec<usize>,
    /// Weeks at the end of each entity tagged `test`
    pub test_weeks: usize,
    /// Entities with fewer weeks are dropped
    pub min_history_weeks: usize,
    /// `share_norm` above this marks a promotion week
    pub promo_threshold: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 4, 8, 12],
            moving_averages: vec![4, 8, 12],
            rolling_std: vec![4, 12],
            test_weeks: 52,
            min_history_weeks: 16,
            promo_threshold: 0.25,
        }
    }
}

impl FeatureConfig {
    fn validate(&self) -> Result<()> {
        if self.lags.is_empty() {
            return Err(invalid("features.lags must not be empty"));
        }
        let windows = self
            .lags
            .iter()
            .chain(&self.moving_averages)
            .chain(&self.rolling_std);
        if windows.into_iter().any(|w| *w == 0) {
            return Err(invalid("features lag and window sizes must be positive"));
        }
        if self.test_weeks == 0 {
            return Err(invalid("features.test_weeks must be at least 1"));
        }
        if self.min_history_weeks < 2 {
            return Err(invalid("features.min_history_weeks must be at least 2"));
        }
        Ok(())
    }
}

/// Regressor fitting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// L2 penalty of the ridge regressor
    pub ridge_alpha: f64,
    /// Trailing train weeks per entity held out for validation
    pub validation_weeks: usize,
    /// Features with train variance at or below this are dropped
    pub variance_threshold: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            ridge_alpha: 1.0,
            validation_weeks: 26,
            variance_threshold: 1e-8,
        }
    }
}

impl TrainingConfig {
    fn validate(&self) -> Result<()> {
        if !(self.ridge_alpha >= 0.0) {
            return Err(invalid("training.ridge_alpha must be non-negative"));
        }
        Ok(())
    }
}

/// Exogenous values for future weeks with no joined row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExogenousFallback {
    /// Use zeros
    #[default]
    Zero,
    /// Reuse the most recent known row for the region
    LastKnown,
}

/// Recursive forecast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Weeks to forecast
    pub horizon_weeks: usize,
    /// Most recent observed weeks kept in each entity's buffer
    pub history_weeks: usize,
    /// Exogenous fallback for future weeks
    pub exogenous_fallback: ExogenousFallback,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_weeks: 12,
            history_weeks: 60,
            exogenous_fallback: ExogenousFallback::Zero,
        }
    }
}

impl ForecastConfig {
    fn validate(&self) -> Result<()> {
        if self.horizon_weeks == 0 {
            return Err(invalid("forecast.horizon_weeks must be at least 1"));
        }
        if self.history_weeks == 0 {
            return Err(invalid("forecast.history_weeks must be at least 1"));
        }
        Ok(())
    }
}

/// Everything the pipeline knows about one category
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryProfile {
    /// Base weekly demand
    pub base_level: f64,
    /// Annual growth rate
    pub trend_rate: f64,
    /// Demand multiplier over week-of-year
    pub seasonality: SeasonalProfile,
    /// Share-tilt index over week-of-year, clamped to `[0, 1]`
    pub tilt: SeasonalProfile,
    /// Demand uplift per cooling degree-day
    pub cdd_coef: f64,
    /// Demand uplift per heating degree-day
    pub hdd_coef: f64,
    /// Whether size earns a preference bonus
    pub size_sensitive: bool,
}

impl Default for CategoryProfile {
    fn default() -> Self {
        Self {
            base_level: 100.0,
            trend_rate: 0.0,
            seasonality: SeasonalProfile {
                baseline: 1.0,
                sine_amplitude: 0.1,
                scale: 1.0,
                combine: Combine::Sum,
                bumps: Vec::new(),
            },
            tilt: SeasonalProfile {
                baseline: 0.2,
                sine_amplitude: 0.1,
                scale: 1.0,
                combine: Combine::Max,
                bumps: Vec::new(),
            },
            cdd_coef: 0.01,
            hdd_coef: 0.01,
            size_sensitive: false,
        }
    }
}

impl CategoryProfile {
    /// A television-like profile: spring and year-end peaks, size matters
    pub fn television() -> Self {
        let bump = |center, width, amplitude| GaussianBump {
            center,
            width,
            amplitude,
        };
        Self {
            base_level: 180.0,
            trend_rate: -0.01,
            seasonality: SeasonalProfile {
                baseline: 1.0,
                sine_amplitude: 0.1,
                scale: 1.0,
                combine: Combine::Sum,
                bumps: vec![bump(11.0, 4.0, 0.3), bump(50.0, 4.0, 0.5)],
            },
            tilt: SeasonalProfile {
                baseline: 0.1,
                sine_amplitude: 0.0,
                scale: 0.8,
                combine: Combine::Max,
                bumps: vec![bump(11.0, 3.0, 1.0), bump(50.0, 3.0, 1.0)],
            },
            size_sensitive: true,
            ..Self::default()
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.base_level >= 0.0) {
            return Err("base_level must be non-negative".to_string());
        }
        if !(self.trend_rate > -1.0) {
            return Err("trend_rate must be greater than -1".to_string());
        }
        self.seasonality.validate().map_err(|e| e.to_string())?;
        self.tilt.validate().map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Input and output locations for the binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SKU catalog CSV
    pub catalog: Option<PathBuf>,
    /// Category series CSV; generated from profiles when absent
    pub category_series: Option<PathBuf>,
    /// Scheduled promotions CSV
    pub promotions: Option<PathBuf>,
    /// Exogenous factors CSV
    pub exogenous: Option<PathBuf>,
    /// Weekly weather CSV; synthesized when absent
    pub weather: Option<PathBuf>,
    /// Directory for all outputs
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn toml_sections_are_optional() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            seed = 7

            [decomposition]
            rho = 0.95

            [categories.TV]
            base_level = 180.0
            size_sensitive = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.decomposition.rho, 0.95);
        assert_eq!(cfg.decomposition.rw_sigma, 0.12);
        assert_eq!(cfg.features.lags, vec![1, 2, 4, 8, 12]);
        assert!(cfg.profile("tv").is_some());
        assert!(cfg.profile("t v").is_some());
        assert!(cfg.profile("washer").is_none());
    }

    #[test]
    fn out_of_range_rho_is_rejected() {
        let err = PipelineConfig::from_toml_str("[decomposition]\nrho = 1.5\n").unwrap_err();
        assert!(matches!(err, DemandError::InvalidParameter(_)));
    }

    #[test]
    fn empty_lags_are_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.features.lags.clear();
        assert!(cfg.validate().is_err());
    }
}
