//! pkgpulse-core - Data model and metrics for pkgpulse
//!
//! This crate holds the I/O-free half of the pipeline, shared by the CLI
//! and anything else that renders package statistics.
//!
//! # Features
//!
//! - Download, star and repository data structures
//! - Normalization of raw upstream responses into dense, ordered series
//! - Period-over-period metrics (deltas, rolling averages, peaks)
//! - Release note parsing and markdown reports

pub mod aggregate;
pub mod data;
pub mod error;
pub mod normalize;
pub mod release;
pub mod report;

pub use aggregate::{moving_average, DownloadMetrics, StarMetrics};
pub use data::{
    ActivityPoint, CommitWeek, ContributorStats, DateRange, DownloadRecord, Granularity, License,
    PullRequest, RangePreset, Release, RepositoryMetadata, RepositorySnapshot, RepositoryStats,
    StarEvent, StarRecord, UserRef,
};
pub use error::{Error, Result};
pub use normalize::{activity_series, normalize_downloads, normalize_stars};
pub use release::{release_label, ReleaseNotes, ReleaseNotesParser};
pub use report::{ComparisonReport, ComparisonRow, DashboardReport, RepositoryCounts};
