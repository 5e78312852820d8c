//! Small numeric and string helpers shared across the crate
pub(crate) mod hashing;

/// Replace values whose magnitude is below `threshold` with exactly zero
///
/// NaN and infinite values pass through unchanged.
pub(crate) fn snap_to_zero(value: f64, threshold: f64) -> f64 {
    if value.abs() < threshold {
        0.
    } else {
        value
    }
}

/// Round `value` to the given number of decimal places
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Round `value` to `figures` significant figures
///
/// # Examples
/// `sigfig_round(0.0123456, 3) == 0.0123`
pub(crate) fn sigfig_round(value: f64, figures: i32) -> f64 {
    if value == 0. || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    round_to(value, figures - 1 - magnitude)
}

/// Join ids into the semicolon separated form used in result tables
pub(crate) fn join_ids<S: AsRef<str>>(ids: &[S]) -> String {
    ids.iter().map(|id| id.as_ref()).collect::<Vec<_>>().join(";")
}
