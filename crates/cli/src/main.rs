//! pkgpulse CLI - Package download and repository statistics

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing::{debug, info, warn};

use pkgpulse::config::{
    CacheSettings, GitHubSettings, WarehouseSettings, DEFAULT_DOWNLOADS_TABLE, DEFAULT_GITHUB_API,
    DEFAULT_MAX_STAR_PAGES, DEFAULT_STATS_API, DEFAULT_WAREHOUSE_API,
};
use pkgpulse::http::RetryPolicy;
use pkgpulse::{Dashboard, Settings, StatsRequest};
use pkgpulse_core::{
    moving_average, release_label, DateRange, Granularity, RangePreset, ReleaseNotesParser,
};

/// pkgpulse: Download and repository statistics for Python packages
#[derive(Parser, Debug)]
#[command(name = "pkgpulse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    upstream: UpstreamArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download and repository metrics for one package
    Stats(StatsArgs),
    /// Compare downloads of several packages
    Compare(CompareArgs),
    /// List a repository's releases with parsed notes
    Releases(ReleasesArgs),
}

#[derive(Args, Debug)]
struct UpstreamArgs {
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT_ID", global = true)]
    project_id: Option<String>,

    /// Base64-encoded service account JSON
    #[arg(long, env = "ENCODED_CREDS", hide_env_values = true, global = true)]
    encoded_creds: Option<String>,

    #[arg(long, env = "WAREHOUSE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    warehouse_token: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    github_token: Option<String>,

    #[arg(
        long,
        env = "PKGPULSE_WAREHOUSE_API",
        default_value = DEFAULT_WAREHOUSE_API,
        global = true
    )]
    warehouse_api_url: String,

    #[arg(long, default_value = DEFAULT_DOWNLOADS_TABLE, global = true)]
    downloads_table: String,

    #[arg(long, env = "PKGPULSE_STATS_API", default_value = DEFAULT_STATS_API, global = true)]
    stats_api_url: String,

    #[arg(long, env = "PKGPULSE_GITHUB_API", default_value = DEFAULT_GITHUB_API, global = true)]
    github_api_url: String,

    #[arg(long, default_value_t = 30, global = true)]
    timeout_secs: u64,

    #[arg(long, default_value_t = 3, global = true)]
    max_retries: u32,

    #[arg(long, default_value_t = DEFAULT_MAX_STAR_PAGES, global = true)]
    max_star_pages: u32,

    #[arg(long, default_value_t = 24 * 60 * 60, global = true)]
    downloads_ttl_secs: u64,

    #[arg(long, default_value_t = 60 * 60, global = true)]
    repository_ttl_secs: u64,
}

impl UpstreamArgs {
    fn settings(&self) -> Settings {
        Settings {
            warehouse: WarehouseSettings {
                project_id: self.project_id.clone(),
                encoded_credentials: self.encoded_creds.clone(),
                access_token: self.warehouse_token.clone(),
                api_url: self.warehouse_api_url.clone(),
                downloads_table: self.downloads_table.clone(),
                ..WarehouseSettings::default()
            },
            github: GitHubSettings {
                token: self.github_token.clone(),
                api_url: self.github_api_url.clone(),
                max_star_pages: self.max_star_pages,
            },
            stats_api_url: self.stats_api_url.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            cache: CacheSettings {
                downloads_ttl: Duration::from_secs(self.downloads_ttl_secs),
                repository_ttl: Duration::from_secs(self.repository_ttl_secs),
            },
        }
    }
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// Preset range in days: 7, 30, 90 or 365
    #[arg(long, default_value = "30")]
    range: String,

    /// Custom start date (YYYY-MM-DD), overrides --range
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Custom end date (YYYY-MM-DD), defaults to today
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,

    /// hourly, daily, weekly or monthly; anything else means daily
    #[arg(short, long, default_value = "daily")]
    granularity: String,
}

impl RangeArgs {
    fn resolve(&self) -> Result<(DateRange, Granularity)> {
        let today = Utc::now().date_naive();
        let range = match self.start {
            Some(start) => DateRange::new(start, self.end.unwrap_or(today))
                .context("Invalid date range")?,
            None => {
                let preset = RangePreset::parse(&self.range).context("Invalid --range")?;
                DateRange::from_preset(preset, today)
            }
        };
        Ok((range, Granularity::parse_or_daily(&self.granularity)))
    }
}

#[derive(Parser, Debug)]
struct StatsArgs {
    /// Package name
    package: String,

    /// GitHub repository (owner/name or URL)
    #[arg(long)]
    repo: Option<String>,

    #[command(flatten)]
    range: RangeArgs,

    #[arg(long, default_value = "text")]
    format: String,

    /// Rolling average window, in periods
    #[arg(long, value_parser = clap::value_parser!(u32).range(2..=30))]
    moving_average: Option<u32>,

    /// Print every period of the download series
    #[arg(long, default_value = "false")]
    show_raw: bool,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// Comma-separated package names
    #[arg(value_delimiter = ',', required = true)]
    packages: Vec<String>,

    /// Comma-separated GitHub repositories, one per package
    #[arg(long, value_delimiter = ',')]
    repos: Vec<String>,

    #[command(flatten)]
    range: RangeArgs,

    #[arg(long, default_value = "markdown")]
    format: String,
}

#[derive(Parser, Debug)]
struct ReleasesArgs {
    /// GitHub repository (owner/name or URL)
    repo: String,

    #[arg(short, long, default_value = "10")]
    limit: usize,

    #[arg(long, default_value = "text")]
    format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.upstream.settings();
    let dashboard = Dashboard::new(&settings).context("Failed to set up upstream clients")?;

    match cli.command {
        Commands::Stats(args) => stats_command(&dashboard, args).await,
        Commands::Compare(args) => compare_command(&dashboard, args).await,
        Commands::Releases(args) => releases_command(&dashboard, args).await,
    }
}

async fn stats_command(dashboard: &Dashboard, args: StatsArgs) -> Result<()> {
    let (range, granularity) = args.range.resolve()?;
    info!("Fetching statistics for {} ({}, {})", args.package, range, granularity);

    let request = StatsRequest {
        package: args.package.clone(),
        repository: args.repo.clone(),
        range,
        granularity,
    };
    let report = dashboard.report(&request).await;

    let series = report.downloads.as_deref().unwrap_or_default();
    let counts: Vec<u64> = series.iter().map(|r| r.downloads).collect();
    let rolling = args
        .moving_average
        .map(|window| moving_average(&counts, window as usize))
        .transpose()?;

    match args.format.as_str() {
        "json" => match &rolling {
            Some(rolling) => {
                let output = serde_json::json!({
                    "report": report,
                    "moving_average": rolling,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            None => println!("{}", report.to_json_pretty()?),
        },
        "markdown" => {
            println!("{}", report.summary());
        }
        _ => {
            println!("{}", report.short_summary());
            for error in &report.errors {
                println!("  ! {}", error);
            }
        }
    }

    if args.show_raw || rolling.is_some() {
        if args.format == "json" {
            debug!("Raw series already included in JSON output");
        } else {
            println!();
            for (i, record) in series.iter().enumerate() {
                let average = rolling
                    .as_ref()
                    .and_then(|r| r[i])
                    .map_or_else(String::new, |a| format!("  (avg {:.1})", a));
                println!("  {}: {}{}", record.period, record.downloads, average);
            }
        }
    }

    if report.has_errors() {
        warn!("{} operation(s) failed", report.errors.len());
    }

    Ok(())
}

async fn compare_command(dashboard: &Dashboard, args: CompareArgs) -> Result<()> {
    let (range, granularity) = args.range.resolve()?;
    let packages: Vec<String> = args
        .packages
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if packages.is_empty() {
        anyhow::bail!("Please enter at least one package name");
    }
    let repos: Vec<String> = args
        .repos
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();

    info!("Comparing {} packages ({}, {})", packages.len(), range, granularity);
    let report = dashboard.compare(&packages, &repos, range, granularity).await;

    match args.format.as_str() {
        "json" => println!("{}", report.to_json_pretty()?),
        _ => println!("{}", report.summary()),
    }

    Ok(())
}

async fn releases_command(dashboard: &Dashboard, args: ReleasesArgs) -> Result<()> {
    let stats = dashboard
        .repository_stats(&args.repo)
        .await
        .with_context(|| format!("Failed to fetch GitHub statistics for {}", args.repo))?;

    let parser = ReleaseNotesParser::new()?;
    let releases: Vec<_> = stats
        .snapshot
        .releases
        .iter()
        .take(args.limit)
        .map(|release| {
            let notes = parser.parse(release.body.as_deref().unwrap_or_default());
            (release_label(release), release, notes)
        })
        .collect();

    if releases.is_empty() {
        info!("No releases found for {}", args.repo);
        return Ok(());
    }

    match args.format.as_str() {
        "json" => {
            let output: Vec<_> = releases
                .iter()
                .map(|(label, release, notes)| {
                    serde_json::json!({
                        "label": label,
                        "release": release,
                        "notes": notes,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            for (label, release, notes) in &releases {
                println!("## {}", label);
                if let Some(name) = release.name.as_deref().filter(|n| !n.is_empty()) {
                    println!("{}", name);
                }
                println!();
                for section in &notes.sections {
                    println!("{}\n", section.content);
                }
                if notes.generated {
                    println!(
                        "{} change(s), {} new contributor(s)\n",
                        notes.changes.len(),
                        notes.new_contributors.len()
                    );
                }
            }
        }
    }

    Ok(())
}
