//! Seasonal curves over ISO week-of-year
//!
//! A [`SeasonalProfile`] evaluates
//! `baseline + sine_amplitude * sin(2*pi*w/52) + scale * combine(bumps)`
//! where each bump is `amplitude * exp(-0.5 * ((w - center) / width)^2)`.
//! The same shape covers both the category demand multiplier (bumps summed
//! on top of 1.0) and the share-tilt index (max of unit bumps, squashed into
//! `[0, 1]`), so callers describe seasonality as data rather than code.

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A single Gaussian peak centered on a week of the year
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianBump {
    /// Week of year at the top of the peak
    pub center: f64,
    /// Standard deviation in weeks
    pub width: f64,
    /// Height of the peak
    #[serde(default = "unit_amplitude")]
    pub amplitude: f64,
}

fn unit_amplitude() -> f64 {
    1.0
}

impl GaussianBump {
    /// Create a new bump
    pub fn new(center: f64, width: f64, amplitude: f64) -> Result<Self> {
        if width <= 0.0 || !width.is_finite() {
            return Err(MathError::InvalidInput(format!(
                "Bump width must be positive, got {}",
                width
            )));
        }
        Ok(Self {
            center,
            width,
            amplitude,
        })
    }

    /// Height of the bump at a given week
    pub fn at(&self, week: f64) -> f64 {
        self.amplitude * (-0.5 * ((week - self.center) / self.width).powi(2)).exp()
    }
}

/// How several bumps are merged into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combine {
    /// Add all bumps together
    #[default]
    Sum,
    /// Take the tallest bump at each week
    Max,
}

/// Seasonal curve over week-of-year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalProfile {
    /// Constant term
    pub baseline: f64,
    /// Amplitude of the annual sinusoid
    pub sine_amplitude: f64,
    /// Multiplier applied to the combined bumps
    pub scale: f64,
    /// Merge rule for the bumps
    pub combine: Combine,
    /// Seasonal peaks
    pub bumps: Vec<GaussianBump>,
}

impl Default for SeasonalProfile {
    fn default() -> Self {
        Self::flat(1.0)
    }
}

impl SeasonalProfile {
    /// A profile that returns `level` every week
    pub fn flat(level: f64) -> Self {
        Self {
            baseline: level,
            sine_amplitude: 0.0,
            scale: 1.0,
            combine: Combine::Sum,
            bumps: Vec::new(),
        }
    }

    /// Builder-style helper to add a peak
    pub fn with_bump(mut self, bump: GaussianBump) -> Self {
        self.bumps.push(bump);
        self
    }

    /// Evaluate the curve at an ISO week number (1..=53)
    pub fn at(&self, week_of_year: u32) -> f64 {
        let w = week_of_year as f64;
        let sine = self.sine_amplitude * (2.0 * PI * w / 52.0).sin();
        let peaks = match self.combine {
            Combine::Sum => self.bumps.iter().map(|b| b.at(w)).sum::<f64>(),
            Combine::Max => self
                .bumps
                .iter()
                .map(|b| b.at(w))
                .fold(0.0_f64, f64::max),
        };
        self.baseline + sine + self.scale * peaks
    }

    /// Evaluate and clamp into `[0, 1]`, for use as a tilt index
    pub fn index_at(&self, week_of_year: u32) -> f64 {
        self.at(week_of_year).clamp(0.0, 1.0)
    }

    /// Check that every bump is well formed
    pub fn validate(&self) -> Result<()> {
        for bump in &self.bumps {
            if bump.width <= 0.0 || !bump.width.is_finite() {
                return Err(MathError::InvalidInput(format!(
                    "Bump centered at week {} has non-positive width {}",
                    bump.center, bump.width
                )));
            }
        }
        if !self.baseline.is_finite() || !self.scale.is_finite() {
            return Err(MathError::InvalidInput(
                "Seasonal baseline and scale must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
