//! Rounding rules applied to engine results.

use crate::engine::CellData;

/// Round half away from zero to `decimals` places.
#[must_use]
pub fn round_to_precision(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    if !factor.is_finite() {
        return value;
    }
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

/// Smallest whole count not below `exact`. Reintroductions are discrete, so
/// the equilibrium count is always rounded up.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn ceil_count(exact: f64) -> i64 {
    exact.ceil() as i64
}

/// Round every numeric value in a cell read (scalar, row/column or block).
#[must_use]
pub fn round_cells(data: CellData, decimals: u32) -> CellData {
    data.map_numbers(|v| round_to_precision(v, decimals))
}
