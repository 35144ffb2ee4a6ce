//! Data structures shared by the fetch, normalization and aggregation layers

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Time-bucket width used to group raw download events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// Parse a granularity name, falling back to daily for anything unknown
    pub fn parse_or_daily(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            _ => Self::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Truncate a timestamp to the start of its bucket.
    ///
    /// Weeks start on Sunday, matching the warehouse's `DATE_TRUNC(.., WEEK)`.
    pub fn truncate(&self, ts: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Hourly => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            Self::Daily => start_of_day(ts.date()),
            Self::Weekly => {
                let date = ts.date();
                let offset = i64::from(date.weekday().num_days_from_sunday());
                start_of_day(date - Duration::days(offset))
            }
            Self::Monthly => {
                let date = ts.date();
                start_of_day(date - Duration::days(i64::from(date.day0())))
            }
        }
    }
}

impl From<&str> for Granularity {
    fn from(value: &str) -> Self {
        Self::parse_or_daily(value)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    NaiveDateTime::new(date, chrono::NaiveTime::MIN)
}

/// Inclusive calendar date range for download queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The `days` days before `today`, through `today`
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        Self {
            start: today - Duration::days(i64::from(days)),
            end: today,
        }
    }

    pub fn from_preset(preset: RangePreset, today: NaiveDate) -> Self {
        Self::last_days(preset.days(), today)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Preset ranges offered to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangePreset {
    Last7Days,
    Last30Days,
    Last90Days,
    Last365Days,
}

impl RangePreset {
    pub fn days(&self) -> u32 {
        match self {
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::Last90Days => 90,
            Self::Last365Days => 365,
        }
    }

    /// Parse `7`, `7d`, or `last-7-days` style names
    pub fn parse(value: &str) -> Result<Self> {
        let digits: String = value.chars().filter(char::is_ascii_digit).collect();
        match digits.as_str() {
            "7" => Ok(Self::Last7Days),
            "30" => Ok(Self::Last30Days),
            "90" => Ok(Self::Last90Days),
            "365" => Ok(Self::Last365Days),
            _ => Err(Error::ParseError {
                what: "date range preset",
                value: value.to_string(),
            }),
        }
    }
}

/// Downloads within one period bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Start of the bucket (midnight for date granularities)
    #[serde(rename = "date")]
    pub period: NaiveDateTime,
    pub downloads: u64,
}

impl DownloadRecord {
    pub fn new(period: NaiveDateTime, downloads: u64) -> Self {
        Self { period, downloads }
    }

    pub fn on_date(date: NaiveDate, downloads: u64) -> Self {
        Self::new(start_of_day(date), downloads)
    }

    pub fn date(&self) -> NaiveDate {
        self.period.date()
    }
}

/// A single star event as reported by the stargazers endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarEvent {
    pub starred_at: DateTime<Utc>,
}

/// Stars received on one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarRecord {
    pub date: NaiveDate,
    pub new_stars: u64,
    /// Running sum of `new_stars` up to and including this day
    pub cumulative_stars: u64,
    /// `new_stars` minus the previous day's `new_stars`
    pub star_change: i64,
}

/// Repository metadata as returned by `GET /repos/{owner}/{name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub license: Option<License>,
    pub stargazers_count: u64,
    pub forks_count: u64,
    pub open_issues_count: u64,
    pub watchers_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub name: String,
    #[serde(default)]
    pub spdx_id: Option<String>,
}

/// One week of the trailing-year commit activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitWeek {
    /// Week start as unix seconds
    pub week: i64,
    pub total: u64,
    #[serde(default)]
    pub days: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorStats {
    #[serde(default)]
    pub author: Option<UserRef>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Drafts have no publication time
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<UserRef>,
}

/// Point-in-time capture of a repository and its derived statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub metadata: RepositoryMetadata,
    pub total_commits: u64,
    pub total_contributors: usize,
    pub total_releases: usize,
    pub commits: Vec<CommitWeek>,
    pub contributors: Vec<ContributorStats>,
    pub releases: Vec<Release>,
    pub pull_requests: Vec<PullRequest>,
    pub star_history: Vec<StarRecord>,
    /// Set when stargazer pagination stopped before the last page
    pub star_history_truncated: bool,
    /// Sub-resources that degraded to empty, one message each
    pub warnings: Vec<String>,
}

impl RepositorySnapshot {
    /// Assemble a snapshot, deriving the commit, contributor and release totals
    pub fn assemble(
        metadata: RepositoryMetadata,
        commits: Vec<CommitWeek>,
        contributors: Vec<ContributorStats>,
        releases: Vec<Release>,
        pull_requests: Vec<PullRequest>,
        star_history: Vec<StarRecord>,
    ) -> Self {
        Self {
            metadata,
            total_commits: commits.iter().map(|w| w.total).sum(),
            total_contributors: contributors.len(),
            total_releases: releases.len(),
            commits,
            contributors,
            releases,
            pull_requests,
            star_history,
            star_history_truncated: false,
            warnings: Vec::new(),
        }
    }
}

/// One row of the weekly repository series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPoint {
    pub date: NaiveDate,
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    pub watchers: u64,
    pub weekly_commits: u64,
}

/// Result of a repository fetch: the weekly series plus the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryStats {
    pub activity: Vec<ActivityPoint>,
    pub snapshot: RepositorySnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 17)
            .unwrap()
    }

    #[test]
    fn test_unknown_granularity_falls_back_to_daily() {
        assert_eq!(Granularity::parse_or_daily("fortnightly"), Granularity::Daily);
        assert_eq!(Granularity::parse_or_daily(" Weekly "), Granularity::Weekly);
        assert_eq!(Granularity::from("hourly"), Granularity::Hourly);
    }

    #[test]
    fn test_truncate_each_granularity() {
        // 2024-03-14 is a Thursday
        let ts = at(2024, 3, 14, 15, 42);

        assert_eq!(
            Granularity::Hourly.truncate(ts),
            at(2024, 3, 14, 15, 0).with_second(0).unwrap()
        );
        assert_eq!(Granularity::Daily.truncate(ts), start_of_day(ts.date()));
        assert_eq!(
            Granularity::Weekly.truncate(ts).date(),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
        assert_eq!(
            Granularity::Monthly.truncate(ts).date(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_weekly_truncate_keeps_sunday() {
        let sunday = at(2024, 3, 10, 0, 5);
        assert_eq!(Granularity::Weekly.truncate(sunday).date(), sunday.date());
    }

    #[test]
    fn test_date_range_rejects_inverted() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(DateRange::new(a, b).is_err());
        assert!(DateRange::new(b, a).is_ok());
        assert!(DateRange::new(a, a).is_ok());
    }

    #[test]
    fn test_range_presets() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let range = DateRange::from_preset(RangePreset::parse("last-30-days").unwrap(), today);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(range.end, today);
        assert_eq!(RangePreset::parse("7d").unwrap(), RangePreset::Last7Days);
        assert!(RangePreset::parse("12").is_err());
    }

    #[test]
    fn test_snapshot_totals() {
        let metadata: RepositoryMetadata = serde_json::from_str(
            r#"{
                "full_name": "octo/widget",
                "stargazers_count": 10,
                "forks_count": 2,
                "open_issues_count": 1,
                "watchers_count": 10,
                "created_at": "2020-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z",
                "license": {"name": "MIT License", "spdx_id": "MIT"}
            }"#,
        )
        .unwrap();

        let commits = vec![
            CommitWeek { week: 0, total: 3, days: vec![] },
            CommitWeek { week: 604_800, total: 4, days: vec![] },
        ];
        let contributors = vec![ContributorStats { author: None, total: 7 }];

        let snapshot =
            RepositorySnapshot::assemble(metadata, commits, contributors, vec![], vec![], vec![]);

        assert_eq!(snapshot.total_commits, 7);
        assert_eq!(snapshot.total_contributors, 1);
        assert_eq!(snapshot.total_releases, 0);
        assert_eq!(snapshot.metadata.license.unwrap().name, "MIT License");
    }
}
