//! # Time Series Reconciliation
//!
//! The store only returns buckets that had data. Charts need a dense series
//! over the whole window, so missing buckets are filled with zeros aligned to
//! the observed ones. This module also derives the chart ceiling and the
//! item status from a series.

use crate::dashboards::{ItemTotal, Thresholds};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tq_core::Interval;
use tq_store::TableResult;

/// Series with more buckets than this lose their partial edge buckets.
const TRIM_THRESHOLD: usize = 10;

/// Native intervals below this skip the newest (still filling) bucket.
const PARTIAL_BUCKET_INTERVAL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Normal,
    Warning,
    Error,
    Disabled,
}

/// Rows of a `timestamp, value` table. Rows without a timestamp are skipped,
/// non-numeric values count as zero.
pub fn points_from_table(table: &TableResult) -> Vec<Point> {
    table
        .rows
        .iter()
        .filter_map(|row| {
            let timestamp = row.first()?.as_datetime()?;
            let value = row.get(1).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Some(Point::new(timestamp, value))
        })
        .collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Insert a zero at every bucket from `cursor` through `end` not already present.
fn zero_fill(
    buckets: &mut BTreeMap<DateTime<Utc>, f64>,
    mut cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
) {
    while cursor <= end {
        buckets.entry(cursor).or_insert(0.0);
        cursor += step;
    }
}

/// Dense series over `[start, end]`, aligned to the earliest observed point.
///
/// Values are rounded to one decimal. When more than ten buckets remain the
/// first and last are dropped, since both usually cover a partial bucket.
pub fn fill_gaps(
    points: &[Point],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
) -> Vec<Point> {
    let Some(earliest) = points.iter().map(|p| p.timestamp).min() else {
        return Vec::new();
    };
    let step = interval.as_duration();
    let step_secs = step.num_seconds().max(1);

    let mut buckets: BTreeMap<DateTime<Utc>, f64> =
        points.iter().map(|p| (p.timestamp, p.value)).collect();

    let offset = (earliest - start).num_seconds().div_euclid(step_secs);
    let first = earliest - Duration::seconds(offset * step_secs);
    zero_fill(&mut buckets, first, end, step);

    let filled: Vec<Point> = buckets
        .into_iter()
        .map(|(timestamp, value)| Point::new(timestamp, round1(value)))
        .collect();

    if filled.len() > TRIM_THRESHOLD {
        filled[1..filled.len() - 1].to_vec()
    } else {
        filled
    }
}

/// Latest bucket start for a series ending in the present: the last observed
/// bucket advanced by whole intervals until it is within one interval of `now`.
fn trailing_end(points: &[Point], interval: Interval, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let step = interval.as_duration();
    let mut end = points.iter().map(|p| p.timestamp).max()?;
    while end < now - step {
        end += step;
    }
    Some(end)
}

/// [`fill_gaps`] for a relative window of length `duration` ending now.
pub fn fill_trailing(
    points: &[Point],
    duration: Duration,
    interval: Interval,
    now: DateTime<Utc>,
) -> Vec<Point> {
    match trailing_end(points, interval, now) {
        Some(end) => fill_gaps(points, end - duration, end, interval),
        None => Vec::new(),
    }
}

/// Dense series for a dashboard tile: anchored on the latest bucket, no
/// alignment search and no edge trimming.
pub fn overview_points(
    points: &[Point],
    duration: Duration,
    interval: Interval,
    now: DateTime<Utc>,
) -> Vec<Point> {
    let Some(end) = trailing_end(points, interval, now) else {
        return Vec::new();
    };
    let mut buckets: BTreeMap<DateTime<Utc>, f64> =
        points.iter().map(|p| (p.timestamp, p.value)).collect();
    zero_fill(&mut buckets, end - duration, end, interval.as_duration());
    buckets
        .into_iter()
        .map(|(timestamp, value)| Point::new(timestamp, round1(value)))
        .collect()
}

pub fn overview_series(
    points: &[Point],
    duration: Duration,
    interval: Interval,
    now: DateTime<Utc>,
) -> Vec<f64> {
    overview_points(points, duration, interval, now)
        .into_iter()
        .map(|p| p.value)
        .collect()
}

/// Minimum chart value configured for `native` buckets, scaled to `current` ones.
pub fn scale_minimum(min_chart_value: f64, native: Interval, current: Interval) -> f64 {
    min_chart_value / native.minutes() as f64 * current.minutes() as f64
}

/// Chart ceiling: the observed maximum, raised towards the scaled minimum but
/// never beyond five times the observed maximum.
pub fn ceiling(observed_max: f64, scaled_min: f64) -> f64 {
    observed_max.max(scaled_min.min(observed_max * 5.0))
}

pub fn max_value(points: &[Point]) -> f64 {
    points.iter().map(|p| p.value).fold(0.0, f64::max)
}

/// Status of an item from its window value and its raw series.
pub fn derive_status(
    value: f64,
    series: &[Point],
    thresholds: &Thresholds,
    total: ItemTotal,
    split_factor: usize,
    native_interval: Interval,
) -> ItemStatus {
    if value <= thresholds.disabled {
        return ItemStatus::Disabled;
    }
    if series.len() <= split_factor {
        return ItemStatus::Normal;
    }

    let mut newest_first: Vec<&Point> = series.iter().collect();
    newest_first.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if native_interval.minutes() < PARTIAL_BUCKET_INTERVAL_MINUTES {
        newest_first.remove(0);
    }
    if split_factor > 0 {
        let keep = newest_first.len() / split_factor;
        newest_first.truncate(keep);
    }

    let recent = match total {
        ItemTotal::Sum => newest_first.iter().map(|p| p.value).sum::<f64>(),
        ItemTotal::Average if newest_first.is_empty() => 0.0,
        ItemTotal::Average => {
            newest_first.iter().map(|p| p.value).sum::<f64>() / newest_first.len() as f64
        }
        ItemTotal::Rpm => return ItemStatus::Normal,
    };

    if thresholds.error > 0.0 && recent >= thresholds.error {
        ItemStatus::Error
    } else if thresholds.warning > 0.0 && recent >= thresholds.warning {
        ItemStatus::Warning
    } else {
        ItemStatus::Normal
    }
}

/// Whether a series looks like it was aggregated per error rather than per
/// request: in the lower half of the values, ranked high to low, the maximum
/// and the average agree once truncated.
pub fn needs_coarse_fallback(values: &[f64]) -> bool {
    if values.len() <= 4 {
        return false;
    }
    let mut ranked = values.to_vec();
    ranked.sort_by(|a, b| b.total_cmp(a));
    let half = ranked.len() / 2;
    let lower = &ranked[half..half * 2];

    let max = lower.iter().copied().fold(f64::MIN, f64::max);
    let avg = lower.iter().sum::<f64>() / lower.len() as f64;
    max.trunc() == avg.trunc()
}
