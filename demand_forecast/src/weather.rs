//! Synthetic weekly weather
//!
//! Weather drives the category generator's degree-day multiplier and can be
//! joined into the feature table as exogenous factors.

use crate::config::{CategoryProfile, WeatherConfig};
use crate::data::ExogenousTable;
use crate::error::{DemandError, Result};
use crate::seed::Seed;
use chrono::{Datelike, Duration, NaiveDate};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

const DAYS_PER_YEAR: f64 = 365.0;

/// Weather summary of one region-week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyWeather {
    /// Region the week belongs to
    pub region: String,
    /// Monday of the week
    pub week: NaiveDate,
    /// Mean of the daily temperatures
    pub temp_mean: f64,
    /// Total precipitation
    pub precip_sum: f64,
    /// Cooling degree-days of the weekly mean
    pub cdd: f64,
    /// Heating degree-days of the weekly mean
    pub hdd: f64,
    /// 1 when any day reached the heat-wave threshold
    pub heat_wave: u8,
    /// 1 when any day reached the cold-wave threshold
    pub cold_wave: u8,
}

/// Weekly weather keyed by (region, week)
#[derive(Debug, Clone, Default)]
pub struct WeatherTable {
    rows: BTreeMap<(String, NaiveDate), WeeklyWeather>,
}

impl WeatherTable {
    /// Build from rows; a later row for the same key replaces an earlier one
    pub fn from_rows(rows: impl IntoIterator<Item = WeeklyWeather>) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|w| ((w.region.clone(), w.week), w))
                .collect(),
        }
    }

    /// Weather of one region-week
    pub fn get(&self, region: &str, week: NaiveDate) -> Option<&WeeklyWeather> {
        self.rows.get(&(region.to_string(), week))
    }

    /// All rows ordered by region, then week
    pub fn rows(&self) -> impl Iterator<Item = &WeeklyWeather> {
        self.rows.values()
    }

    /// Number of region-weeks
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Demand multiplier `1 + cdd_coef * cdd + hdd_coef * hdd`, or `None`
    /// when the week has no weather
    pub fn multiplier(
        &self,
        region: &str,
        week: NaiveDate,
        profile: &CategoryProfile,
    ) -> Option<f64> {
        self.get(region, week)
            .map(|w| 1.0 + profile.cdd_coef * w.cdd + profile.hdd_coef * w.hdd)
    }

    /// Weather as an exogenous table for the feature join
    pub fn to_exogenous(&self) -> Result<ExogenousTable> {
        let mut table = ExogenousTable::new(
            ["temp_mean", "precip_sum", "cdd", "hdd", "heat_wave", "cold_wave"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        );
        for w in self.rows.values() {
            table.insert(
                w.region.clone(),
                w.week,
                vec![
                    w.temp_mean,
                    w.precip_sum,
                    w.cdd,
                    w.hdd,
                    f64::from(w.heat_wave),
                    f64::from(w.cold_wave),
                ],
            )?;
        }
        Ok(table)
    }

    /// Convert a loaded exogenous table with `cdd`/`hdd` columns back into weather
    pub fn from_exogenous(table: &ExogenousTable, weeks: &[NaiveDate]) -> Result<Self> {
        let column = |name: &str| {
            table.columns().iter().position(|c| c == name).ok_or_else(|| {
                DemandError::SchemaError {
                    table: "weather".to_string(),
                    missing: vec![name.to_string()],
                }
            })
        };
        let cdd = column("cdd")?;
        let hdd = column("hdd")?;
        let temp = table.columns().iter().position(|c| c == "temp_mean");
        let precip = table.columns().iter().position(|c| c == "precip_sum");

        let regions: Vec<String> = table.regions();
        let mut rows = Vec::new();
        for region in &regions {
            for &week in weeks {
                if let Some(values) = table.get(region, week) {
                    rows.push(WeeklyWeather {
                        region: region.clone(),
                        week,
                        temp_mean: temp.map(|i| values[i]).unwrap_or(0.0),
                        precip_sum: precip.map(|i| values[i]).unwrap_or(0.0),
                        cdd: values[cdd],
                        hdd: values[hdd],
                        heat_wave: 0,
                        cold_wave: 0,
                    });
                }
            }
        }
        Ok(Self::from_rows(rows))
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn seasonal_wave(day_of_year: u32, peak_day: f64) -> f64 {
    // a sine peaks a quarter period after its zero crossing
    let phase = peak_day - DAYS_PER_YEAR / 4.0;
    (2.0 * PI * (f64::from(day_of_year) - phase) / DAYS_PER_YEAR).sin()
}

/// Synthesize weekly weather for every configured region over `weeks`.
///
/// Each region draws from its own stream derived from `seed`, so adding a
/// region does not change the others.
pub fn synthesize_weather(
    config: &WeatherConfig,
    weeks: &[NaiveDate],
    seed: Seed,
) -> Result<WeatherTable> {
    let temp_noise = Normal::new(0.0, config.temp_noise_c)
        .map_err(|e| DemandError::InvalidParameter(format!("temp_noise_c: {}", e)))?;
    let precip_noise = Normal::new(0.0, 1.0)
        .map_err(|e| DemandError::InvalidParameter(format!("precip noise: {}", e)))?;

    let mut rows = Vec::with_capacity(weeks.len() * config.regions.len());
    for region in &config.regions {
        let mut rng = seed.derive(&format!("weather/{}", region)).to_rng();
        for &monday in weeks {
            let mut temps = [0.0; 7];
            let mut precip = 0.0;
            for (offset, temp) in temps.iter_mut().enumerate() {
                let day = monday + Duration::days(offset as i64);
                let doy = day.ordinal();
                *temp = config.mean_temp_c
                    + config.temp_amplitude_c * seasonal_wave(doy, config.temp_peak_day)
                    + temp_noise.sample(&mut rng);
                let expected = config.precip_base_mm
                    + config.precip_amplitude_mm * seasonal_wave(doy, config.precip_peak_day);
                precip += (expected + precip_noise.sample(&mut rng)).max(0.0);
            }

            let temp_mean = round1(temps.iter().sum::<f64>() / 7.0);
            let hottest = temps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let coldest = temps.iter().copied().fold(f64::INFINITY, f64::min);
            rows.push(WeeklyWeather {
                region: region.clone(),
                week: monday,
                temp_mean,
                precip_sum: round1(precip),
                cdd: round1((temp_mean - config.cooling_base_c).max(0.0)),
                hdd: round1((config.heating_base_c - temp_mean).max(0.0)),
                heat_wave: u8::from(hottest >= config.heat_wave_c),
                cold_wave: u8::from(coldest <= config.cold_wave_c),
            });
        }
    }
    Ok(WeatherTable::from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::weekly_grid;

    fn year_grid() -> Vec<NaiveDate> {
        weekly_grid(
            NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 25).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn summer_is_warmer_than_winter() {
        let table = synthesize_weather(&WeatherConfig::default(), &year_grid(), Seed::new(1)).unwrap();
        let jan = table.get("hq", NaiveDate::from_ymd_opt(2023, 1, 9).unwrap()).unwrap();
        let jul = table.get("hq", NaiveDate::from_ymd_opt(2023, 7, 17).unwrap()).unwrap();
        assert!(jul.temp_mean > jan.temp_mean + 10.0);
        assert!(jan.hdd > 0.0);
        assert_eq!(jan.cdd, 0.0);
        assert!(table.rows().all(|w| w.precip_sum >= 0.0));
    }

    #[test]
    fn same_seed_same_weather() {
        let grid = year_grid();
        let a = synthesize_weather(&WeatherConfig::default(), &grid, Seed::new(5)).unwrap();
        let b = synthesize_weather(&WeatherConfig::default(), &grid, Seed::new(5)).unwrap();
        assert!(a.rows().zip(b.rows()).all(|(x, y)| x == y));
        assert_eq!(a.len(), grid.len());
    }

    #[test]
    fn multiplier_is_missing_without_weather() {
        let table = WeatherTable::default();
        let profile = CategoryProfile::default();
        assert_eq!(
            table.multiplier("hq", NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), &profile),
            None
        );
    }

    #[test]
    fn exogenous_view_keeps_columns() {
        let grid = year_grid();
        let table = synthesize_weather(&WeatherConfig::default(), &grid[..4], Seed::new(3)).unwrap();
        let exo = table.to_exogenous().unwrap();
        assert_eq!(exo.columns().len(), 6);
        assert_eq!(exo.len(), 4);
        let back = WeatherTable::from_exogenous(&exo, &grid[..4]).unwrap();
        assert_eq!(back.len(), 4);
    }
}
