//! # Demand Forecast
//!
//! Synthesizes weekly SKU-level demand from category totals and forecasts it.
//!
//! ## Features
//!
//! - Category demand generation (trend, seasonality, weather, noise)
//! - SKU share decomposition with lifecycle, promotion and attribute effects
//! - Optional split of warehouse demand into virtual stores
//! - Leakage-safe feature engineering with a chronological train/test split
//! - Ridge regression and recursive multi-week forecasting
//! - An idempotent forecast ledger
//!
//! Every random draw comes from a stream derived from one master [`Seed`],
//! so the same configuration and inputs reproduce the same output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use demand_forecast::{Pipeline, PipelineConfig, PipelineInputs};
//! use demand_forecast::data::DataLoader;
//!
//! let config = PipelineConfig::from_toml_file("pipeline.toml")?;
//! let catalog = DataLoader::load_catalog("catalog.csv")?;
//!
//! let pipeline = Pipeline::new(config)?;
//! let output = pipeline.run(&PipelineInputs::new(catalog))?;
//! println!("{} forecast rows", output.forecasts.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod calendar;
pub mod config;
pub mod data;
pub mod decomposition;
pub mod error;
pub mod features;
pub mod forecast;
pub mod generator;
pub mod io;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod seed;
pub mod stores;
pub mod weather;

// Re-export commonly used types
pub use crate::config::{CategoryProfile, PipelineConfig};
pub use crate::data::{Catalog, CategoryWeek, SkuRecord, SkuWeekRow};
pub use crate::decomposition::DecompositionEngine;
pub use crate::error::{DemandError, PipelineError, Result, Stage};
pub use crate::features::{FeatureBuilder, FeatureTable};
pub use crate::forecast::{ForecastRow, RecursiveForecaster};
pub use crate::generator::CategoryDemandGenerator;
pub use crate::ledger::ForecastLedger;
pub use crate::models::{Regressor, RidgeRegressor};
pub use crate::pipeline::{Pipeline, PipelineInputs, PipelineOutput};
pub use crate::seed::Seed;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
