//! # SKU Demand
//!
//! Workspace facade over the two crates of the SKU demand pipeline:
//!
//! - [`math`]: trailing-window statistics, seasonal curves and conserved
//!   integer allocation
//! - [`forecast`]: category demand synthesis, SKU decomposition, features,
//!   training and recursive forecasting
//!
//! ## Example
//!
//! ```
//! use sku_demand_workspace::math::largest_remainder;
//!
//! let parts = largest_remainder(100, &[0.7, 0.3]).unwrap();
//! assert_eq!(parts, vec![70, 30]);
//! ```

pub use demand_forecast as forecast;
pub use demand_math as math;

/// Version of the pipeline crate
pub fn version() -> &'static str {
    demand_forecast::VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_pipeline_crate() {
        assert_eq!(version(), forecast::VERSION);
    }

    #[test]
    fn test_default_seed() {
        assert_eq!(forecast::Seed::default().value(), 42);
    }
}
