//! Window extraction over time series.
//!
//! A window starts at the first reading not older than a cutoff
//! (`reference - lookback`) and holds at most `count` readings. Short tails
//! are returned as they are; empty or unsorted input yields an empty window.

use chrono::{DateTime, Duration, Utc};

use crate::ReadingSeries;

/// Spacing assumed between readings when the look-back is derived from the
/// window size.
const READING_STEP_HOURS: i64 = 1;

/// Most recent `count` hourly slots ending at `reference`.
///
/// The look-back is `count - 1` hours, so an hourly series whose last point
/// is `reference` yields exactly its last `count` points.
pub fn extract(series: &ReadingSeries, reference: DateTime<Utc>, count: usize) -> ReadingSeries {
    let steps = i64::try_from(count.saturating_sub(1)).unwrap_or(i64::MAX / 2);
    let lookback = Duration::try_hours(steps.saturating_mul(READING_STEP_HOURS))
        .unwrap_or(Duration::MAX);
    extract_with_lookback(series, reference, lookback, count)
}

/// Window of at most `count` readings starting at the first one no older
/// than `reference - lookback`.
pub fn extract_with_lookback(
    series: &ReadingSeries,
    reference: DateTime<Utc>,
    lookback: Duration,
    count: usize,
) -> ReadingSeries {
    if count == 0 || series.is_empty() || !series.is_sorted() {
        return ReadingSeries::empty();
    }

    let start = match reference.checked_sub_signed(lookback) {
        Some(cutoff) => series.timestamps().partition_point(|ts| *ts < cutoff),
        // Cutoff before the representable range: everything qualifies
        None => 0,
    };

    if start == series.len() {
        return ReadingSeries::empty();
    }

    series.slice(start, start.saturating_add(count))
}
