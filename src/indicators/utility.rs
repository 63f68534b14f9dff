/// `part / total` as a percentage. Returns `None` when `total` is zero so a
/// missing denominator is never reported as 0%.
pub fn pct(part: f64, total: f64) -> Option<f64> {
    if total == 0.0 {
        return None;
    }
    Some(part / total * 100.0)
}

/// Rounds for display. Aggregation always works on unrounded values.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
