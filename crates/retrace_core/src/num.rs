//! Numeric helpers shared by the diff and matrix components.

/// Round to `dp` decimal places, half away from zero.
///
/// Reported deltas and scores are rounded so that equal inputs serialize
/// to byte-identical JSON regardless of accumulated float noise.
#[must_use]
pub fn round_dp(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}
