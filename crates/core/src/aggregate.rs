//! Period-over-period metrics derived from normalized series

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::data::{DownloadRecord, StarRecord};
use crate::error::{Error, Result};

/// Width of the trailing window used for weekly comparisons
pub const WEEK: usize = 7;

/// Metrics over a download series ordered by date
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DownloadMetrics {
    pub latest: u64,
    pub previous: u64,
    pub daily_change: i64,
    pub weekly_average: f64,
    pub previous_weekly_average: f64,
    pub weekly_average_change: f64,
    pub peak: u64,
    pub previous_peak: u64,
    /// `latest - previous_peak`; compares the current value, not the peak
    pub peak_change: i64,
    pub mean: f64,
    pub range_total: u64,
}

impl DownloadMetrics {
    pub fn from_series(series: &[DownloadRecord]) -> Self {
        let values: Vec<u64> = series.iter().map(|r| r.downloads).collect();

        let latest = values.last().copied().unwrap_or(0);
        let previous = if values.len() >= 2 {
            values[values.len() - 2]
        } else {
            0
        };

        let (weekly_average, previous_weekly_average) = weekly_means(&values);

        let peak = values.iter().copied().max().unwrap_or(0);
        let previous_peak = match values.split_last() {
            Some((_, rest)) => rest.iter().copied().max().unwrap_or(0),
            None => 0,
        };

        Self {
            latest,
            previous,
            daily_change: signed_diff(latest, previous),
            weekly_average,
            previous_weekly_average,
            weekly_average_change: weekly_average - previous_weekly_average,
            peak,
            previous_peak,
            peak_change: signed_diff(latest, previous_peak),
            mean: mean(&values),
            range_total: values.iter().sum(),
        }
    }
}

/// Metrics over a daily star history
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StarMetrics {
    pub stars_this_week: u64,
    pub stars_previous_week: u64,
    pub stars_change: i64,
    pub peak_stars: u64,
    /// First day reaching `peak_stars`; `None` for an empty history
    pub peak_stars_day: Option<NaiveDate>,
    pub average_daily_stars: f64,
    pub average_daily_stars_change: f64,
}

impl StarMetrics {
    /// Compute star metrics relative to `today`.
    ///
    /// "This week" is every day on or after `today - 7`; the previous week is
    /// `[today - 14, today - 7)`.
    pub fn from_series(series: &[StarRecord], today: NaiveDate) -> Self {
        let week_start = today - Duration::days(WEEK as i64);
        let previous_start = today - Duration::days(2 * WEEK as i64);

        let stars_this_week: u64 = series
            .iter()
            .filter(|r| r.date >= week_start)
            .map(|r| r.new_stars)
            .sum();
        let stars_previous_week: u64 = series
            .iter()
            .filter(|r| r.date >= previous_start && r.date < week_start)
            .map(|r| r.new_stars)
            .sum();

        // Strict comparison keeps the earliest day on ties
        let mut peak: Option<&StarRecord> = None;
        for record in series {
            if peak.map_or(true, |p| record.new_stars > p.new_stars) {
                peak = Some(record);
            }
        }

        let values: Vec<u64> = series.iter().map(|r| r.new_stars).collect();
        let (recent, earlier) = weekly_means(&values);

        Self {
            stars_this_week,
            stars_previous_week,
            stars_change: signed_diff(stars_this_week, stars_previous_week),
            peak_stars: peak.map_or(0, |p| p.new_stars),
            peak_stars_day: peak.map(|p| p.date),
            average_daily_stars: mean(&values),
            average_daily_stars_change: recent - earlier,
        }
    }
}

/// Rolling mean over `window` values; `None` until the window is full
pub fn moving_average(values: &[u64], window: usize) -> Result<Vec<Option<f64>>> {
    if window == 0 {
        return Err(Error::ConfigError(
            "Moving average window must be at least 1".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0u64;
    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= values[i - window];
        }
        out.push((i + 1 >= window).then(|| sum as f64 / window as f64));
    }
    Ok(out)
}

/// Mean of the values; 0 for an empty slice
pub fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

/// Mean of the trailing week and of the week before it.
///
/// The trailing mean uses however many values exist (up to 7); the earlier
/// mean is 0 unless at least two full weeks are present.
fn weekly_means(values: &[u64]) -> (f64, f64) {
    let n = values.len();
    let recent = mean(&values[n.saturating_sub(WEEK)..]);
    let earlier = if n >= 2 * WEEK {
        mean(&values[n - 2 * WEEK..n - WEEK])
    } else {
        0.0
    };
    (recent, earlier)
}

fn signed_diff(a: u64, b: u64) -> i64 {
    a as i64 - b as i64
}
