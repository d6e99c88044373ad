//! Error types for the demand_forecast crate

use demand_math::MathError;
use polars::prelude::PolarsError;
use std::fmt;
use thiserror::Error;

/// Custom error types for the demand_forecast crate
#[derive(Debug, Error)]
pub enum DemandError {
    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// A table is missing required columns
    #[error("Schema error in {table}: missing required columns {missing:?}")]
    SchemaError {
        /// Name of the table being read
        table: String,
        /// Columns that were expected but not found
        missing: Vec<String>,
    },

    /// SKU identifiers that fail the format check
    #[error("Invalid sku_id format: {examples:?} ({count} rows in total)")]
    InvalidSkuId {
        /// First few offending identifiers
        examples: Vec<String>,
        /// Number of offending rows
        count: usize,
    },

    /// Demand series categories with no catalog entry
    #[error("No catalog SKUs for categories: {0:?}")]
    MissingCatalogCategory(Vec<String>),

    /// Error related to parameter validation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error related to input validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Error from fitting or applying a regressor
    #[error("Model error: {0}")]
    ModelError(String),

    /// Illegal transition of a decomposition stream
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Error from the numeric primitives
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),

    /// Error from CSV writing
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Error from reading or parsing configuration
    #[error("Config error: {0}")]
    ConfigError(String),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, DemandError>;

impl From<PolarsError> for DemandError {
    fn from(err: PolarsError) -> Self {
        DemandError::PolarsError(err.to_string())
    }
}

impl From<csv::Error> for DemandError {
    fn from(err: csv::Error) -> Self {
        DemandError::CsvError(err.to_string())
    }
}

impl From<toml::de::Error> for DemandError {
    fn from(err: toml::de::Error) -> Self {
        DemandError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for DemandError {
    fn from(err: serde_json::Error) -> Self {
        DemandError::DataError(err.to_string())
    }
}

/// Pipeline stage, used to report where a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reading and validating input tables
    LoadInputs,
    /// Synthesizing category-level weekly demand
    GenerateCategoryDemand,
    /// Splitting category totals across SKUs
    Decompose,
    /// Splitting warehouse series across virtual stores
    SplitStores,
    /// Building the feature table
    Features,
    /// Fitting the regressor
    Train,
    /// Recursive multi-week forecasting
    Forecast,
    /// Writing outputs
    WriteOutputs,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LoadInputs => "load-inputs",
            Stage::GenerateCategoryDemand => "generate-category-demand",
            Stage::Decompose => "decompose",
            Stage::SplitStores => "split-stores",
            Stage::Features => "features",
            Stage::Train => "train",
            Stage::Forecast => "forecast",
            Stage::WriteOutputs => "write-outputs",
        };
        f.write_str(name)
    }
}

/// A failed pipeline run: which stage, which input, and why
#[derive(Debug, Error)]
#[error("Pipeline stage '{stage}' failed on input '{input}': {source}")]
pub struct PipelineError {
    /// Stage that failed
    pub stage: Stage,
    /// Input table or artifact being processed
    pub input: String,
    /// Underlying cause
    #[source]
    pub source: DemandError,
}

impl PipelineError {
    /// Wrap an error with the stage and input it came from
    pub fn new(stage: Stage, input: impl Into<String>, source: DemandError) -> Self {
        Self {
            stage,
            input: input.into(),
            source,
        }
    }
}

/// Attach stage context to a `Result`
pub trait StageContext<T> {
    /// Tag the error with the stage and input that produced it
    fn stage(self, stage: Stage, input: &str) -> std::result::Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: Stage, input: &str) -> std::result::Result<T, PipelineError> {
        self.map_err(|e| PipelineError::new(stage, input, e))
    }
}
