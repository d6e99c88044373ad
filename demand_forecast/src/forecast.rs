//! Recursive multi-week forecasting
//!
//! Every entity is forecast independently. Within an entity the horizon is
//! a fold over the future weeks: the feature vector of step `h` is built
//! from a buffer holding the observed history followed by the predictions of
//! steps `1..h`, exactly as training rows were built from observed history.

use crate::calendar::future_weeks;
use crate::config::{ExogenousFallback, ForecastConfig};
use crate::data::ExogenousTable;
use crate::error::{DemandError, Result};
use crate::features::{promo_flag, EntitySeries, FeatureSpec};
use crate::models::{FeatureProjection, Regressor};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One forecast week of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    /// Warehouse identifier
    pub warehouse_id: i64,
    /// Region
    pub region: String,
    /// Store identifier
    pub store_id: i64,
    /// SKU identifier
    pub sku_id: String,
    /// Week being forecast
    pub target_week: NaiveDate,
    /// Steps ahead, starting at 1
    pub step: usize,
    /// Prediction clipped at zero
    pub y_pred: f64,
    /// Prediction rounded to whole units
    pub y_pred_qty: u64,
}

/// Produces H-week-ahead forecasts from a fitted regressor
pub struct RecursiveForecaster<'a, R: Regressor + ?Sized> {
    model: &'a R,
    spec: &'a FeatureSpec,
    projection: FeatureProjection,
    config: &'a ForecastConfig,
    exogenous: Option<&'a ExogenousTable>,
    promo_threshold: f64,
}

impl<'a, R: Regressor + ?Sized> RecursiveForecaster<'a, R> {
    /// Bind a model to the feature layout it was trained on
    pub fn new(
        model: &'a R,
        spec: &'a FeatureSpec,
        config: &'a ForecastConfig,
        promo_threshold: f64,
    ) -> Result<Self> {
        if config.horizon_weeks == 0 {
            return Err(DemandError::InvalidParameter(
                "horizon_weeks must be at least 1".to_string(),
            ));
        }
        let projection = FeatureProjection::new(&spec.columns(), model.feature_names())?;
        Ok(Self {
            model,
            spec,
            projection,
            config,
            exogenous: None,
            promo_threshold,
        })
    }

    /// Exogenous factors for future weeks
    pub fn with_exogenous(mut self, exogenous: &'a ExogenousTable) -> Self {
        self.exogenous = Some(exogenous);
        self
    }

    fn exogenous_for(&self, region: &str, week: NaiveDate) -> Option<&'a [f64]> {
        let table = self.exogenous?;
        table.get(region, week).or_else(|| match self.config.exogenous_fallback {
            ExogenousFallback::Zero => None,
            ExogenousFallback::LastKnown => table.last_known(region, week),
        })
    }

    /// Forecast one entity for the weeks following `anchor`.
    ///
    /// Weeks between the entity's last observation and `anchor` count as
    /// zero demand.
    pub fn forecast_entity(
        &self,
        series: &EntitySeries,
        anchor: NaiveDate,
    ) -> Result<Vec<ForecastRow>> {
        let last = series.last_week().ok_or_else(|| {
            DemandError::DataError(format!("Entity {} has no history", series.key))
        })?;

        let mut history = series.qty.clone();
        let mut last_share = series.share.last().copied().unwrap_or(0.0);
        let mut week = last + Duration::weeks(1);
        while week <= anchor {
            history.push(0.0);
            last_share = 0.0;
            week += Duration::weeks(1);
        }
        let keep = self.config.history_weeks.min(history.len());
        let buffer = history[history.len() - keep..].to_vec();
        let first_promo_prev = promo_flag(last_share, self.promo_threshold);

        let (_, rows) = future_weeks(anchor, self.config.horizon_weeks)
            .into_iter()
            .enumerate()
            .try_fold(
                (buffer, Vec::with_capacity(self.config.horizon_weeks)),
                |(mut buffer, mut rows), (i, target_week)| {
                    // future promotions are unknown
                    let promo_prev = if i == 0 { first_promo_prev } else { 0.0 };
                    let exo = self.exogenous_for(&series.key.region, target_week);
                    let full = self
                        .spec
                        .feature_vector(&buffer, promo_prev, target_week, exo);
                    let y_pred = self
                        .model
                        .predict_row(&self.projection.project(&full))?
                        .max(0.0);
                    buffer.push(y_pred);
                    rows.push(ForecastRow {
                        warehouse_id: series.key.warehouse_id,
                        region: series.key.region.clone(),
                        store_id: series.key.store_id,
                        sku_id: series.key.sku_id.clone(),
                        target_week,
                        step: i + 1,
                        y_pred,
                        y_pred_qty: y_pred.round() as u64,
                    });
                    Ok::<_, DemandError>((buffer, rows))
                },
            )?;
        Ok(rows)
    }

    /// Forecast every entity, starting the week after the latest observed
    /// week across all of them. Output follows the input order.
    pub fn forecast(&self, series: &[EntitySeries]) -> Result<Vec<ForecastRow>> {
        let anchor = match series.iter().filter_map(EntitySeries::last_week).max() {
            Some(anchor) => anchor,
            None => return Ok(Vec::new()),
        };
        debug!(%anchor, entities = series.len(), "forecasting");

        let per_entity = series
            .par_iter()
            .filter(|s| !s.is_empty())
            .map(|s| self.forecast_entity(s, anchor))
            .collect::<Result<Vec<_>>>()?;
        let rows: Vec<ForecastRow> = per_entity.into_iter().flatten().collect();
        info!(
            entities = series.len(),
            horizon = self.config.horizon_weeks,
            rows = rows.len(),
            "forecast finished"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::features::EntityKey;

    /// Predicts `lag_1 + 1`
    struct NextValue {
        names: Vec<String>,
    }

    impl Regressor for NextValue {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_row(&self, features: &[f64]) -> Result<f64> {
            Ok(features[0] + 1.0)
        }
    }

    fn series(qty: Vec<f64>, start: NaiveDate) -> EntitySeries {
        let weeks = (0..qty.len() as i64)
            .map(|i| start + Duration::weeks(i))
            .collect();
        EntitySeries {
            key: EntityKey {
                warehouse_id: 1,
                store_id: 1,
                sku_id: "TV-1".to_string(),
                region: "hq".to_string(),
            },
            category_id: "TV".to_string(),
            share: vec![0.1; qty.len()],
            weeks,
            qty,
        }
    }

    #[test]
    fn predictions_feed_back_as_lags() {
        let spec = FeatureSpec::new(&FeatureConfig::default(), &[]).unwrap();
        let model = NextValue {
            names: vec!["lag_1".to_string()],
        };
        let config = ForecastConfig {
            horizon_weeks: 3,
            ..ForecastConfig::default()
        };
        let forecaster = RecursiveForecaster::new(&model, &spec, &config, 0.25).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = forecaster.forecast(&[series(vec![4.0, 5.0], start)]).unwrap();
        let preds: Vec<f64> = rows.iter().map(|r| r.y_pred).collect();
        assert_eq!(preds, vec![6.0, 7.0, 8.0]);
        assert_eq!(rows[0].target_week, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(rows[2].step, 3);
    }

    #[test]
    fn unknown_model_feature_is_rejected() {
        let spec = FeatureSpec::new(&FeatureConfig::default(), &[]).unwrap();
        let model = NextValue {
            names: vec!["nope".to_string()],
        };
        let config = ForecastConfig::default();
        assert!(RecursiveForecaster::new(&model, &spec, &config, 0.25).is_err());
    }
}
