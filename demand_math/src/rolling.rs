//! Trailing-window statistics
//!
//! Every function takes `history`, the values observed strictly before the
//! week being described. Callers pass `&series[..t]` when building the
//! features of week `t`, which is what keeps the label out of its own
//! window (shift-then-roll).

use statrs::statistics::Statistics;

/// Value `k` steps back from the end of `history`.
///
/// `lag(history, 1)` is the most recent value. Returns `None` when the
/// history is too short or `k == 0`.
pub fn lag(history: &[f64], k: usize) -> Option<f64> {
    if k == 0 || k > history.len() {
        return None;
    }
    Some(history[history.len() - k])
}

/// Mean of the last `window` values of `history`.
///
/// Uses whatever is available when the history is shorter than the window
/// (`min_periods = 1`). Returns `None` for an empty history or a zero window.
pub fn trailing_mean(history: &[f64], window: usize) -> Option<f64> {
    let tail = tail(history, window)?;
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Sample standard deviation (n - 1) of the last `window` values.
///
/// Needs at least two values, otherwise `None`.
pub fn trailing_std(history: &[f64], window: usize) -> Option<f64> {
    let tail = tail(history, window)?;
    if tail.len() < 2 {
        return None;
    }
    let std = tail.iter().std_dev();
    if std.is_finite() {
        Some(std)
    } else {
        None
    }
}

/// Difference between the most recent value and the one `k` steps before it.
pub fn trailing_difference(history: &[f64], k: usize) -> Option<f64> {
    let latest = lag(history, 1)?;
    let earlier = lag(history, k + 1)?;
    Some(latest - earlier)
}

fn tail(history: &[f64], window: usize) -> Option<&[f64]> {
    if window == 0 || history.is_empty() {
        return None;
    }
    let start = history.len().saturating_sub(window);
    Some(&history[start..])
}
