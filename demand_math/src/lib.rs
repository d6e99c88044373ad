//! # Demand Math
//!
//! Numeric building blocks shared by the demand synthesis and forecasting
//! pipeline. Nothing in here knows about SKUs, stores or calendars.
//!
//! - [`rolling`]: lag, trailing mean and trailing standard deviation over
//!   a history slice (the value at `t` is never part of its own window)
//! - [`seasonal`]: Gaussian-bump plus annual sinusoid curves over week-of-year
//! - [`allocation`]: softmax, normalization and largest-remainder
//!   integer allocation

use thiserror::Error;

pub mod allocation;
pub mod rolling;
pub mod seasonal;

pub use allocation::{largest_remainder, normalize, softmax};
pub use rolling::{lag, trailing_mean, trailing_std};
pub use seasonal::{Combine, GaussianBump, SeasonalProfile};

/// Errors that can occur in demand math operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for demand math operations
pub type Result<T> = std::result::Result<T, MathError>;
