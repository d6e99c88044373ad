//! Category demand generator
//!
//! `demand(week) = round(max(0, base * (1 + trend)^(year - base_year)
//! * seasonality(woy) * weather(week) * noise))` with `noise ~ N(1, sigma)`.
//! Everything category-specific comes from a [`CategoryProfile`].

use crate::calendar::{week_of_year, weekly_grid};
use crate::config::{CategoryProfile, GeneratorConfig};
use crate::data::CategoryWeek;
use crate::error::{DemandError, Result};
use crate::seed::Seed;
use crate::weather::WeatherTable;
use chrono::{Datelike, NaiveDate};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Deterministic part of the demand for one week, before noise
pub fn expected_demand(
    profile: &CategoryProfile,
    week: NaiveDate,
    base_year: i32,
    weather_multiplier: f64,
) -> f64 {
    let trend = (1.0 + profile.trend_rate).powi(week.year() - base_year);
    let season = profile.seasonality.at(week_of_year(week));
    profile.base_level * trend * season * weather_multiplier
}

/// Synthesizes weekly category totals from profiles
#[derive(Debug, Clone)]
pub struct CategoryDemandGenerator<'a> {
    config: &'a GeneratorConfig,
    weather: Option<&'a WeatherTable>,
}

impl<'a> CategoryDemandGenerator<'a> {
    /// Create a generator without weather (multiplier 1.0 every week)
    pub fn new(config: &'a GeneratorConfig) -> Self {
        Self {
            config,
            weather: None,
        }
    }

    /// Use weather for the degree-day multiplier
    pub fn with_weather(mut self, weather: &'a WeatherTable) -> Self {
        self.weather = Some(weather);
        self
    }

    /// The Monday grid covered by the configured range
    pub fn weeks(&self) -> Result<Vec<NaiveDate>> {
        weekly_grid(self.config.start, self.config.end)
    }

    fn base_year(&self) -> i32 {
        self.config.base_year.unwrap_or_else(|| self.config.start.year())
    }

    /// Generate one category over `weeks` from the given random stream
    pub fn generate_category<R: Rng + ?Sized>(
        &self,
        category: &str,
        profile: &CategoryProfile,
        weeks: &[NaiveDate],
        rng: &mut R,
    ) -> Result<Vec<CategoryWeek>> {
        let noise = Normal::new(1.0, self.config.noise_sigma)
            .map_err(|e| DemandError::InvalidParameter(format!("noise_sigma: {}", e)))?;
        let base_year = self.base_year();
        let mut missing_weather = 0usize;

        let rows = weeks
            .iter()
            .map(|&week| {
                let weather = match self.weather {
                    Some(table) => table.multiplier(&self.config.region, week, profile),
                    None => Some(1.0),
                };
                let multiplier = weather.unwrap_or_else(|| {
                    missing_weather += 1;
                    1.0
                });
                let demand = expected_demand(profile, week, base_year, multiplier)
                    * noise.sample(rng);
                CategoryWeek {
                    warehouse_id: self.config.warehouse_id,
                    region: self.config.region.clone(),
                    store_id: self.config.store_id,
                    category_id: category.to_string(),
                    week,
                    demand_qty: demand.max(0.0).round() as u64,
                }
            })
            .collect();

        if missing_weather > 0 {
            warn!(
                category,
                weeks = missing_weather,
                "no weather for some weeks, using multiplier 1.0"
            );
        }
        Ok(rows)
    }

    /// Generate every profiled category, one derived random stream each.
    ///
    /// Output is ordered by category key, then week.
    pub fn generate(
        &self,
        profiles: &BTreeMap<String, CategoryProfile>,
        seed: Seed,
    ) -> Result<Vec<CategoryWeek>> {
        let weeks = self.weeks()?;
        let per_category = profiles
            .par_iter()
            .map(|(category, profile)| {
                let mut rng = seed
                    .derive(&format!("category/{}/{}", self.config.warehouse_id, category))
                    .to_rng();
                self.generate_category(category, profile, &weeks, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;

        let rows: Vec<CategoryWeek> = per_category.into_iter().flatten().collect();
        debug!(
            categories = profiles.len(),
            weeks = weeks.len(),
            rows = rows.len(),
            "generated category demand"
        );
        Ok(rows)
    }
}
