//! Reports combining download and repository metrics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::aggregate::{mean, DownloadMetrics, StarMetrics};
use crate::data::{DateRange, DownloadRecord, Granularity, RepositoryStats};
use crate::error::Result;

/// Everything derived for one (package, repository) request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardReport {
    pub package: String,
    pub repository: Option<String>,
    pub range: DateRange,
    pub granularity: Granularity,
    pub generated_at: DateTime<Utc>,
    pub lifetime_downloads: u64,
    pub downloads: Option<Vec<DownloadRecord>>,
    pub download_metrics: Option<DownloadMetrics>,
    pub repository_stats: Option<Arc<RepositoryStats>>,
    pub star_metrics: Option<StarMetrics>,
    /// One message per failed top-level operation
    pub errors: Vec<String>,
}

impl DashboardReport {
    pub fn new(
        package: impl Into<String>,
        repository: Option<String>,
        range: DateRange,
        granularity: Granularity,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            package: package.into(),
            repository,
            range,
            granularity,
            generated_at,
            lifetime_downloads: 0,
            downloads: None,
            download_metrics: None,
            repository_stats: None,
            star_metrics: None,
            errors: Vec::new(),
        }
    }

    pub fn set_downloads(&mut self, records: Vec<DownloadRecord>) {
        self.download_metrics = Some(DownloadMetrics::from_series(&records));
        self.downloads = Some(records);
    }

    pub fn set_repository(&mut self, stats: Arc<RepositoryStats>, today: NaiveDate) {
        self.star_metrics = Some(StarMetrics::from_series(
            &stats.snapshot.star_history,
            today,
        ));
        self.repository_stats = Some(stats);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Generate a markdown summary
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("## {} ({}, {})\n", self.package, self.range, self.granularity));

        lines.push("### Downloads\n".to_string());
        lines.push("| Metric | Value | Change |".to_string());
        lines.push("|--------|-------|--------|".to_string());
        lines.push(format!(
            "| Lifetime downloads | {} | |",
            fmt_count(self.lifetime_downloads)
        ));
        if let Some(m) = &self.download_metrics {
            lines.push(format!(
                "| Latest period | {} | {} vs previous |",
                fmt_count(m.latest),
                fmt_signed(m.daily_change)
            ));
            lines.push(format!(
                "| Weekly average | {:.0} | {:+.0} vs last week |",
                m.weekly_average, m.weekly_average_change
            ));
            lines.push(format!(
                "| Peak | {} | {} from previous |",
                fmt_count(m.peak),
                fmt_signed(m.peak_change)
            ));
            lines.push(format!("| Range total | {} | |", fmt_count(m.range_total)));
        }
        lines.push(String::new());

        if let Some(stats) = &self.repository_stats {
            let snapshot = &stats.snapshot;
            let meta = &snapshot.metadata;

            lines.push(format!("### Repository {}\n", meta.full_name));
            lines.push("| Metric | Value | Change |".to_string());
            lines.push("|--------|-------|--------|".to_string());
            lines.push(format!("| Stars | {} | |", fmt_count(meta.stargazers_count)));
            if let Some(s) = &self.star_metrics {
                lines.push(format!(
                    "| Stars this week | {} | {} vs previous |",
                    fmt_count(s.stars_this_week),
                    fmt_signed(s.stars_change)
                ));
                lines.push(format!(
                    "| Average stars/day | {:.1} | {:+.1} vs last week |",
                    s.average_daily_stars, s.average_daily_stars_change
                ));
                let peak_day = s
                    .peak_stars_day
                    .map_or_else(|| "-".to_string(), |d| d.to_string());
                lines.push(format!(
                    "| Peak stars/day | {} | on {} |",
                    fmt_count(s.peak_stars),
                    peak_day
                ));
            }
            lines.push(format!("| Forks | {} | |", fmt_count(meta.forks_count)));
            lines.push(format!(
                "| Contributors | {} | |",
                fmt_count(snapshot.total_contributors as u64)
            ));
            lines.push(format!(
                "| Releases | {} | |",
                fmt_count(snapshot.total_releases as u64)
            ));
            lines.push(format!(
                "| Commits (last year) | {} | |",
                fmt_count(snapshot.total_commits)
            ));
            lines.push(format!("| Open issues | {} | |", fmt_count(meta.open_issues_count)));
            lines.push(String::new());

            lines.push(format!(
                "- Created: {}\n- Last updated: {}\n- Language: {}\n- License: {}",
                meta.created_at.format("%Y-%m-%d"),
                meta.updated_at.format("%Y-%m-%d"),
                meta.language.as_deref().unwrap_or("Not specified"),
                meta.license
                    .as_ref()
                    .map_or("Not specified", |l| l.name.as_str()),
            ));
            if let Some(description) = meta.description.as_deref().filter(|d| !d.is_empty()) {
                lines.push(format!("- Description: {description}"));
            }
            lines.push(String::new());

            if !snapshot.warnings.is_empty() {
                lines.push("### ⚠️ Partial repository data\n".to_string());
                for warning in &snapshot.warnings {
                    lines.push(format!("- {warning}"));
                }
                lines.push(String::new());
            }
        }

        if !self.errors.is_empty() {
            lines.push("### 🚨 Errors\n".to_string());
            for error in &self.errors {
                lines.push(format!("- {error}"));
            }
        }

        lines.join("\n")
    }

    /// One-line summary for plain text output
    pub fn short_summary(&self) -> String {
        let mut parts = vec![format!(
            "{}: {} lifetime downloads",
            self.package,
            fmt_count(self.lifetime_downloads)
        )];

        if let Some(m) = &self.download_metrics {
            parts.push(format!(
                "{} latest ({})",
                fmt_count(m.latest),
                fmt_signed(m.daily_change)
            ));
        }

        if let Some(stats) = &self.repository_stats {
            parts.push(format!(
                "⭐ {}",
                fmt_count(stats.snapshot.metadata.stargazers_count)
            ));
        }

        if let Some(s) = &self.star_metrics {
            parts.push(format!("{} stars this week", fmt_signed(s.stars_this_week as i64)));
        }

        if !self.errors.is_empty() {
            parts.push(format!("{} error(s)", self.errors.len()));
        }

        parts.join(", ")
    }
}

/// Per-package row of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub package: String,
    /// Range figures are `None` when the download query failed
    pub range_total: Option<u64>,
    pub lifetime_downloads: u64,
    pub average: Option<f64>,
    pub peak: Option<u64>,
    pub repository: Option<RepositoryCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCounts {
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
}

impl ComparisonRow {
    pub fn new(
        package: impl Into<String>,
        series: &[DownloadRecord],
        lifetime_downloads: u64,
    ) -> Self {
        let values: Vec<u64> = series.iter().map(|r| r.downloads).collect();
        Self {
            package: package.into(),
            range_total: Some(values.iter().sum()),
            lifetime_downloads,
            average: Some(mean(&values)),
            peak: Some(values.iter().copied().max().unwrap_or(0)),
            repository: None,
        }
    }

    pub fn without_downloads(package: impl Into<String>, lifetime_downloads: u64) -> Self {
        Self {
            package: package.into(),
            range_total: None,
            lifetime_downloads,
            average: None,
            peak: None,
            repository: None,
        }
    }
}

/// Side-by-side comparison of several packages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub rows: Vec<ComparisonRow>,
    /// Download series per package, for charting
    pub series: Vec<(String, Vec<DownloadRecord>)>,
    pub errors: Vec<String>,
}

impl ComparisonReport {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        if self.rows.is_empty() {
            return "No packages to compare.".to_string();
        }

        let mut lines = Vec::new();
        lines.push("## Package Comparison\n".to_string());
        lines.push(
            "| Package | Range downloads | Lifetime | Avg | Max | Stars | Forks | Open issues |"
                .to_string(),
        );
        lines.push(
            "|---------|-----------------|----------|-----|-----|-------|-------|-------------|"
                .to_string(),
        );

        for row in &self.rows {
            let (stars, forks, issues) = match &row.repository {
                Some(r) => (fmt_count(r.stars), fmt_count(r.forks), fmt_count(r.open_issues)),
                None => ("-".to_string(), "-".to_string(), "-".to_string()),
            };
            let missing = || "-".to_string();
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                row.package,
                row.range_total.map_or_else(missing, fmt_count),
                fmt_count(row.lifetime_downloads),
                row.average.map_or_else(missing, |a| format!("{a:.0}")),
                row.peak.map_or_else(missing, fmt_count),
                stars,
                forks,
                issues
            ));
        }

        if !self.errors.is_empty() {
            lines.push(String::new());
            lines.push("### 🚨 Errors\n".to_string());
            for error in &self.errors {
                lines.push(format!("- {error}"));
            }
        }

        lines.join("\n")
    }
}

/// Format a count with thousands separators
pub fn fmt_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a signed delta with an explicit sign and thousands separators
pub fn fmt_signed(value: i64) -> String {
    let sign = if value < 0 { '-' } else { '+' };
    format!("{sign}{}", fmt_count(value.unsigned_abs()))
}
