//! Share vectors and conserved integer allocation

use crate::{MathError, Result};

/// Numerically stable softmax of a logit vector.
///
/// Returns an empty vector for empty input.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Scale `values` in place so they sum to one.
///
/// Returns `false` and leaves the vector untouched when the sum is not
/// strictly positive.
pub fn normalize(values: &mut [f64]) -> bool {
    let sum: f64 = values.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return false;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
    true
}

/// Split `total` into integer parts proportional to `shares`.
///
/// Every part starts at `floor(total * share)`; the remaining units go one
/// at a time to the largest fractional remainders, ties broken by position.
/// The parts always sum to `total` exactly. `shares` must be non-negative
/// and sum to a positive value; they are normalized internally.
pub fn largest_remainder(total: u64, shares: &[f64]) -> Result<Vec<u64>> {
    if shares.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot allocate across an empty share vector".to_string(),
        ));
    }
    if shares.iter().any(|s| *s < 0.0 || !s.is_finite()) {
        return Err(MathError::InvalidInput(
            "Shares must be finite and non-negative".to_string(),
        ));
    }
    let sum: f64 = shares.iter().sum();
    if sum <= 0.0 {
        return Err(MathError::InvalidInput(
            "Shares must have a positive sum".to_string(),
        ));
    }

    let exact: Vec<f64> = shares.iter().map(|s| total as f64 * s / sum).collect();
    let mut parts: Vec<u64> = exact.iter().map(|e| e.floor() as u64).collect();
    let assigned: u64 = parts.iter().sum();

    if assigned > total {
        return Err(MathError::CalculationError(format!(
            "Floored allocation {} exceeds total {}",
            assigned, total
        )));
    }

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.partial_cmp(&fa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let remainder = (total - assigned) as usize;
    // zero-share slots never receive a remainder unit
    let eligible: Vec<usize> = order.into_iter().filter(|&i| shares[i] > 0.0).collect();
    for i in 0..remainder {
        parts[eligible[i % eligible.len()]] += 1;
    }

    Ok(parts)
}
