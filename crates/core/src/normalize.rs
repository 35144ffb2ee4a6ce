//! Normalization of raw upstream responses into dense, ordered series

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

use crate::data::{
    ActivityPoint, CommitWeek, DownloadRecord, Granularity, RepositoryMetadata, StarEvent,
    StarRecord,
};

/// Build the daily star history from raw star events.
///
/// The result covers every calendar day (UTC) from the first to the last
/// event, inclusive, with zero-filled gaps.
pub fn normalize_stars(events: &[StarEvent]) -> Vec<StarRecord> {
    let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for event in events {
        *per_day.entry(event.starred_at.date_naive()).or_default() += 1;
    }

    let (Some(&first), Some(&last)) = (per_day.keys().next(), per_day.keys().next_back()) else {
        return Vec::new();
    };

    let mut records = Vec::with_capacity((last - first).num_days() as usize + 1);
    let mut cumulative = 0u64;
    let mut previous: Option<u64> = None;

    for date in first.iter_days().take_while(|d| *d <= last) {
        let new_stars = per_day.get(&date).copied().unwrap_or(0);
        cumulative += new_stars;
        let star_change = match previous {
            Some(prev) => new_stars as i64 - prev as i64,
            None => new_stars as i64,
        };
        previous = Some(new_stars);

        records.push(StarRecord {
            date,
            new_stars,
            cumulative_stars: cumulative,
            star_change,
        });
    }

    records
}

/// The Sunday on or before `today`, used as the newest weekly bucket date
pub fn weekly_anchor(today: NaiveDate) -> NaiveDate {
    today - Duration::days(i64::from(today.weekday().num_days_from_sunday()))
}

/// Map commit-activity buckets onto synthesized weekly dates ending at `today`.
///
/// Oldest bucket first. Repository counts are repeated on every point since
/// the API only reports their current values.
pub fn activity_series(
    metadata: &RepositoryMetadata,
    commits: &[CommitWeek],
    today: NaiveDate,
) -> Vec<ActivityPoint> {
    let anchor = weekly_anchor(today);
    let n = commits.len() as i64;

    commits
        .iter()
        .enumerate()
        .map(|(i, week)| ActivityPoint {
            date: anchor - Duration::weeks(n - 1 - i as i64),
            stars: metadata.stargazers_count,
            forks: metadata.forks_count,
            open_issues: metadata.open_issues_count,
            watchers: metadata.watchers_count,
            weekly_commits: week.total,
        })
        .collect()
}

/// Re-bucket warehouse rows with `granularity`, summing rows that share a
/// bucket, in ascending order.
pub fn normalize_downloads<I>(rows: I, granularity: Granularity) -> Vec<DownloadRecord>
where
    I: IntoIterator<Item = (NaiveDateTime, u64)>,
{
    let mut buckets: BTreeMap<NaiveDateTime, u64> = BTreeMap::new();
    for (ts, downloads) in rows {
        *buckets.entry(granularity.truncate(ts)).or_default() += downloads;
    }

    buckets
        .into_iter()
        .map(|(period, downloads)| DownloadRecord::new(period, downloads))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn star(y: i32, m: u32, d: u32, h: u32) -> StarEvent {
        StarEvent {
            starred_at: Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_star_gaps_are_zero_filled() {
        let events = vec![star(2024, 5, 1, 9), star(2024, 5, 6, 23)];
        let records = normalize_stars(&events);

        assert_eq!(records.len(), 6);
        assert_eq!(records.iter().filter(|r| r.new_stars == 0).count(), 4);
        assert_eq!(records.first().unwrap().date, date(2024, 5, 1));
        assert_eq!(records.last().unwrap().date, date(2024, 5, 6));
    }

    #[test]
    fn test_star_cumulative_and_change() {
        let events = vec![
            star(2024, 5, 1, 1),
            star(2024, 5, 1, 2),
            star(2024, 5, 1, 3),
            star(2024, 5, 3, 1),
            star(2024, 5, 4, 1),
            star(2024, 5, 4, 5),
        ];
        let records = normalize_stars(&events);

        let new: Vec<u64> = records.iter().map(|r| r.new_stars).collect();
        let cumulative: Vec<u64> = records.iter().map(|r| r.cumulative_stars).collect();
        let change: Vec<i64> = records.iter().map(|r| r.star_change).collect();

        assert_eq!(new, vec![3, 0, 1, 2]);
        assert_eq!(cumulative, vec![3, 3, 4, 6]);
        assert_eq!(change, vec![3, -3, 1, 1]);
        assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_star_events_out_of_order() {
        let events = vec![star(2024, 5, 3, 1), star(2024, 5, 1, 1)];
        let records = normalize_stars(&events);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].date, date(2024, 5, 1));
        assert_eq!(records[2].cumulative_stars, 2);
    }

    #[test]
    fn test_no_star_events() {
        assert!(normalize_stars(&[]).is_empty());
    }

    #[test]
    fn test_activity_series_dates() {
        let metadata: RepositoryMetadata = serde_json::from_str(
            r#"{
                "full_name": "octo/widget",
                "stargazers_count": 42,
                "forks_count": 5,
                "open_issues_count": 3,
                "watchers_count": 42,
                "created_at": "2020-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        let commits: Vec<CommitWeek> = (0..3)
            .map(|i| CommitWeek { week: i, total: i as u64 * 10, days: vec![] })
            .collect();

        // Wednesday; newest bucket lands on the preceding Sunday
        let series = activity_series(&metadata, &commits, date(2024, 5, 8));

        let dates: Vec<NaiveDate> = series.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date(2024, 4, 21), date(2024, 4, 28), date(2024, 5, 5)]);
        assert_eq!(series[2].weekly_commits, 20);
        assert!(series.iter().all(|p| p.stars == 42 && p.forks == 5));
    }

    #[test]
    fn test_downloads_rebucketed_and_sorted() {
        let ts = |d: u32, h: u32| date(2024, 5, d).and_hms_opt(h, 0, 0).unwrap();
        let rows = vec![(ts(7, 3), 5), (ts(6, 1), 2), (ts(7, 22), 1), (ts(6, 12), 3)];

        let daily = normalize_downloads(rows.clone(), Granularity::Daily);
        assert_eq!(
            daily,
            vec![
                DownloadRecord::on_date(date(2024, 5, 6), 5),
                DownloadRecord::on_date(date(2024, 5, 7), 6),
            ]
        );

        let weekly = normalize_downloads(rows, Granularity::Weekly);
        assert_eq!(weekly, vec![DownloadRecord::on_date(date(2024, 5, 5), 11)]);
    }
}
