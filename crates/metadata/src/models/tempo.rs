use std::ops::RangeInclusive;

/// Parses a tempo tag and keeps it only when it falls inside `plausible`.
///
/// Accepts a decimal comma (`"126,5"`), which some taggers write in locales
/// that use one.
pub fn parse_bpm(raw: &str, plausible: &RangeInclusive<f32>) -> Option<f32> {
    let bpm = raw.trim().replace(',', ".").parse::<f32>().ok()?;
    (bpm.is_finite() && plausible.contains(&bpm)).then_some(bpm)
}

/// Renders a tempo without a trailing `.0`: `128`, `126.5`.
pub fn format_bpm(bpm: f32) -> String {
    let rounded = (bpm * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 { format!("{rounded:.0}") } else { format!("{rounded:.1}") }
}
