//! End-to-end pipeline
//!
//! Stages run in a fixed order and each one only sees the output of the
//! stages before it. The first failing stage aborts the run with a
//! [`PipelineError`] naming the stage and the input it was working on; no
//! partial output is returned.

use crate::calendar::weekly_grid;
use crate::config::{PathsConfig, PipelineConfig};
use crate::data::{Catalog, CategoryWeek, DataLoader, ExogenousTable, PromotionSchedule, SkuWeekRow};
use crate::decomposition::{DecompositionEngine, DecompositionReport};
use crate::error::{DemandError, PipelineError, Result, Stage, StageContext};
use crate::features::{FeatureBuilder, FeatureRow, FeatureSet, Split};
use crate::forecast::{ForecastRow, RecursiveForecaster};
use crate::generator::CategoryDemandGenerator;
use crate::io::{write_csv, write_json};
use crate::ledger::ForecastLedger;
use crate::metrics::{forecast_accuracy, ForecastAccuracy};
use crate::models::{
    predict_split, train_ridge, validation_split, FeatureProjection, Regressor, RidgeRegressor,
};
use crate::seed::Seed;
use crate::stores::split_virtual_stores;
use crate::weather::{synthesize_weather, WeatherTable};
use serde::Serialize;
use std::path::Path;
use tracing::{info, info_span};

type StageResult<T> = std::result::Result<T, PipelineError>;

/// Tables the pipeline starts from
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    /// SKU catalog
    pub catalog: Catalog,
    /// Category demand; generated from profiles when absent
    pub category_series: Option<Vec<CategoryWeek>>,
    /// Scheduled promotions
    pub promotions: Option<PromotionSchedule>,
    /// Exogenous factors; weather is used when absent
    pub exogenous: Option<ExogenousTable>,
    /// Weekly weather; synthesized when absent
    pub weather: Option<WeatherTable>,
}

impl PipelineInputs {
    /// Inputs with only a catalog
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            category_series: None,
            promotions: None,
            exogenous: None,
            weather: None,
        }
    }

    /// Use an existing category series instead of generating one
    pub fn with_category_series(mut self, series: Vec<CategoryWeek>) -> Self {
        self.category_series = Some(series);
        self
    }

    /// Scheduled promotions
    pub fn with_promotions(mut self, promotions: PromotionSchedule) -> Self {
        self.promotions = Some(promotions);
        self
    }

    /// Exogenous factors
    pub fn with_exogenous(mut self, exogenous: ExogenousTable) -> Self {
        self.exogenous = Some(exogenous);
        self
    }

    /// Read every configured input file
    pub fn load(paths: &PathsConfig, weeks: &[chrono::NaiveDate]) -> StageResult<Self> {
        let catalog_path = paths.catalog.as_ref().ok_or_else(|| {
            PipelineError::new(
                Stage::LoadInputs,
                "catalog",
                DemandError::ConfigError("paths.catalog is required".to_string()),
            )
        })?;
        let name = catalog_path.display().to_string();
        let catalog = DataLoader::load_catalog(catalog_path).stage(Stage::LoadInputs, &name)?;
        let mut inputs = Self::new(catalog);

        if let Some(path) = &paths.category_series {
            let name = path.display().to_string();
            inputs.category_series =
                Some(DataLoader::load_category_series(path).stage(Stage::LoadInputs, &name)?);
        }
        if let Some(path) = &paths.promotions {
            let name = path.display().to_string();
            inputs.promotions =
                Some(DataLoader::load_promotions(path).stage(Stage::LoadInputs, &name)?);
        }
        if let Some(path) = &paths.exogenous {
            let name = path.display().to_string();
            inputs.exogenous =
                Some(DataLoader::load_exogenous(path).stage(Stage::LoadInputs, &name)?);
        }
        if let Some(path) = &paths.weather {
            let name = path.display().to_string();
            let table = DataLoader::load_exogenous(path)
                .and_then(|t| WeatherTable::from_exogenous(&t, weeks))
                .stage(Stage::LoadInputs, &name)?;
            inputs.weather = Some(table);
        }
        Ok(inputs)
    }
}

/// Fitted model with its evaluation
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    /// The regressor
    pub model: RidgeRegressor,
    /// Master seed of the run
    pub seed: u64,
    /// Rows held out from fitting
    pub validation: Option<ForecastAccuracy>,
    /// Test split accuracy
    pub test: Option<ForecastAccuracy>,
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Category demand used for decomposition
    pub category_series: Vec<CategoryWeek>,
    /// Weather, when generated or supplied
    pub weather: Option<WeatherTable>,
    /// SKU-week rows after decomposition and the optional store split
    pub sku_rows: Vec<SkuWeekRow>,
    /// Decomposition counters
    pub decomposition: DecompositionReport,
    /// Feature table and aligned series
    pub features: FeatureSet,
    /// Fitted model and accuracy
    pub model: ModelReport,
    /// Forecast rows
    pub forecasts: Vec<ForecastRow>,
    /// Forecasts keyed for persistence
    pub ledger: ForecastLedger,
}

/// Runs every stage with one configuration
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate the configuration and create the pipeline
    pub fn new(config: PipelineConfig) -> StageResult<Self> {
        config.validate().stage(Stage::LoadInputs, "config")?;
        Ok(Self { config })
    }

    /// Configuration in use
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Weeks covered by the generator range
    pub fn weeks(&self) -> Result<Vec<chrono::NaiveDate>> {
        weekly_grid(self.config.generator.start, self.config.generator.end)
    }

    /// Run all stages
    pub fn run(&self, inputs: &PipelineInputs) -> StageResult<PipelineOutput> {
        let seed = Seed::new(self.config.seed);
        info!(seed = seed.value(), skus = inputs.catalog.len(), "pipeline started");

        let (category_series, weather) = {
            let _span = info_span!("stage", name = %Stage::GenerateCategoryDemand).entered();
            self.category_demand(inputs, seed)?
        };

        let decomposition = {
            let _span = info_span!("stage", name = %Stage::Decompose).entered();
            let mut engine = DecompositionEngine::new(&self.config.decomposition, &inputs.catalog)
                .with_profiles(&self.config.categories);
            if let Some(promotions) = &inputs.promotions {
                engine = engine.with_promotions(promotions);
            }
            engine
                .run(&category_series, seed)
                .stage(Stage::Decompose, "category_series")?
        };

        let sku_rows = if self.config.stores.enabled {
            let _span = info_span!("stage", name = %Stage::SplitStores).entered();
            split_virtual_stores(&decomposition.rows, &self.config.stores, seed)
                .stage(Stage::SplitStores, "sku_weeks")?
        } else {
            decomposition.rows
        };

        let (features, exogenous) = {
            let _span = info_span!("stage", name = %Stage::Features).entered();
            let exogenous = match (&inputs.exogenous, &weather) {
                (Some(table), _) => Some(table.clone()),
                (None, Some(weather)) => {
                    Some(weather.to_exogenous().stage(Stage::Features, "weather")?)
                }
                (None, None) => None,
            };
            let mut builder = FeatureBuilder::new(&self.config.features);
            if let Some(table) = &exogenous {
                builder = builder.with_exogenous(table);
            }
            let features = builder.build(&sku_rows).stage(Stage::Features, "sku_weeks")?;
            (features, exogenous)
        };

        let model = {
            let _span = info_span!("stage", name = %Stage::Train).entered();
            self.train(&features).stage(Stage::Train, "feature_table")?
        };

        let (forecasts, ledger) = {
            let _span = info_span!("stage", name = %Stage::Forecast).entered();
            self.forecast(&features, &model.model, exogenous.as_ref())
                .stage(Stage::Forecast, "model")?
        };

        info!(
            sku_rows = sku_rows.len(),
            feature_rows = features.table.len(),
            forecasts = forecasts.len(),
            "pipeline finished"
        );
        Ok(PipelineOutput {
            category_series,
            weather,
            sku_rows,
            decomposition: decomposition.report,
            features,
            model,
            forecasts,
            ledger,
        })
    }

    fn category_demand(
        &self,
        inputs: &PipelineInputs,
        seed: Seed,
    ) -> StageResult<(Vec<CategoryWeek>, Option<WeatherTable>)> {
        if let Some(series) = &inputs.category_series {
            return Ok((series.clone(), inputs.weather.clone()));
        }
        let stage = Stage::GenerateCategoryDemand;
        if self.config.categories.is_empty() {
            return Err(PipelineError::new(
                stage,
                "categories",
                DemandError::ConfigError(
                    "no category series supplied and no category profiles configured".to_string(),
                ),
            ));
        }

        let weeks = self.weeks().stage(stage, "generator")?;
        let weather = match &inputs.weather {
            Some(weather) => weather.clone(),
            None => synthesize_weather(&self.config.weather, &weeks, seed.derive("weather"))
                .stage(stage, "weather")?,
        };
        let series = CategoryDemandGenerator::new(&self.config.generator)
            .with_weather(&weather)
            .generate(&self.config.categories, seed)
            .stage(stage, "categories")?;
        Ok((series, Some(weather)))
    }

    fn train(&self, features: &FeatureSet) -> Result<ModelReport> {
        let table = &features.table;
        let model = train_ridge(table, &self.config.training)?;
        let projection = FeatureProjection::new(table.columns(), model.feature_names())?;

        let (_, validation_rows) = validation_split(table, self.config.training.validation_weeks);
        let validation = evaluate(&model, &projection, &validation_rows)?;
        let (actual, predicted): (Vec<f64>, Vec<f64>) =
            predict_split(&model, table, Split::Test)?.into_iter().unzip();
        let test = if actual.is_empty() {
            None
        } else {
            Some(forecast_accuracy(&predicted, &actual)?)
        };
        if let Some(acc) = &test {
            info!(mae = acc.mae, mape = acc.mape, smape = acc.smape, "test accuracy");
        }

        Ok(ModelReport {
            model,
            seed: self.config.seed,
            validation,
            test,
        })
    }

    fn forecast(
        &self,
        features: &FeatureSet,
        model: &RidgeRegressor,
        exogenous: Option<&ExogenousTable>,
    ) -> Result<(Vec<ForecastRow>, ForecastLedger)> {
        let mut forecaster = RecursiveForecaster::new(
            model,
            &features.spec,
            &self.config.forecast,
            self.config.features.promo_threshold,
        )?;
        if let Some(table) = exogenous {
            forecaster = forecaster.with_exogenous(table);
        }
        let forecasts = forecaster.forecast(&features.series)?;

        let mut ledger = ForecastLedger::new().skip_zero_predictions(true);
        if let Some(anchor) = features.series.iter().filter_map(|s| s.last_week()).max() {
            let snapshot = anchor.and_hms_opt(0, 0, 0).ok_or_else(|| {
                DemandError::DataError(format!("Cannot build snapshot time for {}", anchor))
            })?;
            ledger.upsert_forecasts(&forecasts, snapshot);
        }
        Ok((forecasts, ledger))
    }

    /// Write every output table into `dir`
    pub fn write_outputs(&self, output: &PipelineOutput, dir: &Path) -> StageResult<()> {
        let _span = info_span!("stage", name = %Stage::WriteOutputs).entered();
        let stage = Stage::WriteOutputs;
        let target = |file: &str| dir.join(file);

        write_csv(target("category_weekly.csv"), &output.category_series)
            .stage(stage, "category_weekly.csv")?;
        if let Some(weather) = &output.weather {
            let rows: Vec<_> = weather.rows().cloned().collect();
            write_csv(target("weather_weekly.csv"), &rows).stage(stage, "weather_weekly.csv")?;
        }
        write_csv(target("sku_weekly.csv"), &output.sku_rows).stage(stage, "sku_weekly.csv")?;
        output
            .features
            .table
            .write_csv(target("features.csv"))
            .stage(stage, "features.csv")?;
        write_json(target("model.json"), &output.model).stage(stage, "model.json")?;
        write_csv(target("forecasts.csv"), &output.forecasts).stage(stage, "forecasts.csv")?;
        output
            .ledger
            .write_csv(target("forecast_ledger.csv"))
            .stage(stage, "forecast_ledger.csv")?;

        info!(dir = %dir.display(), "outputs written");
        Ok(())
    }
}

fn evaluate(
    model: &RidgeRegressor,
    projection: &FeatureProjection,
    rows: &[&FeatureRow],
) -> Result<Option<ForecastAccuracy>> {
    if rows.is_empty() {
        return Ok(None);
    }
    let predicted = rows
        .iter()
        .map(|r| Ok(model.predict_row(&projection.project(&r.features))?.max(0.0)))
        .collect::<Result<Vec<f64>>>()?;
    let actual: Vec<f64> = rows.iter().map(|r| r.y).collect();
    forecast_accuracy(&predicted, &actual).map(Some)
}
