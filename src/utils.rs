use std::time::{Duration, Instant};

/// Render a duration with automatic unit scaling, e.g. `1.94ms` or `2.34s`.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn when the time since `start` exceeds `threshold`.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            duration = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            "Slow operation: {label}"
        );
    }
}

/// Parse a comma-separated list of item ids, e.g. `"5,4551,4552"`.
///
/// Whitespace around ids and empty segments are ignored.
pub fn parse_id_list(raw: &str) -> Result<Vec<u32>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .parse::<u32>()
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| format!("'{segment}' is not a valid item id"))
        })
        .collect()
}
