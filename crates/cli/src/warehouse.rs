//! Download counts from the analytics warehouse (BigQuery REST v2)

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use pkgpulse_core::{normalize_downloads, DateRange, DownloadRecord, Granularity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WarehouseSettings;
use crate::credentials::TokenSource;
use crate::error::{Error, Result};

/// Server-side wait per query/poll request
const QUERY_WAIT: Duration = Duration::from_secs(30);

/// Added to the server-side wait for the client-side request timeout
const QUERY_WAIT_MARGIN: Duration = Duration::from_secs(10);

/// Warehouse client issuing parameterized download queries
#[derive(Debug)]
pub struct WarehouseClient {
    client: reqwest::Client,
    api_base: String,
    project_id: String,
    table: String,
    tokens: TokenSource,
    max_polls: u32,
    query_wait: Duration,
}

impl WarehouseClient {
    /// Create a client from settings, resolving project and credentials
    pub fn new(client: reqwest::Client, settings: &WarehouseSettings) -> Result<Self> {
        let (project_id, tokens) = settings.resolve(&client)?;
        Self::with_token_source(
            client,
            &settings.api_url,
            project_id,
            &settings.downloads_table,
            tokens,
            settings.max_polls,
        )
    }

    pub fn with_token_source(
        client: reqwest::Client,
        api_base: &str,
        project_id: String,
        table: &str,
        tokens: TokenSource,
        max_polls: u32,
    ) -> Result<Self> {
        let table_ok = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !table_ok {
            return Err(Error::Config(format!("invalid warehouse table name: {table}")));
        }

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            project_id,
            table: table.to_string(),
            tokens,
            max_polls,
            query_wait: QUERY_WAIT,
        })
    }

    /// How long the warehouse may hold each query or poll request open.
    ///
    /// Requests carry their own timeout of this wait plus a margin, so a
    /// shorter client-wide timeout does not cut a long poll short.
    pub fn with_query_wait(mut self, wait: Duration) -> Self {
        self.query_wait = wait;
        self
    }

    /// SQL for a download query at the given granularity.
    ///
    /// The bucket expression is selected as `date` and grouped by that alias,
    /// so the grouping key and the reported period always agree.
    pub fn download_query(&self, granularity: Granularity) -> String {
        format!(
            "SELECT {} AS date, COUNT(*) AS downloads \
             FROM `{}` \
             WHERE file.project = @package_name \
             AND DATE(timestamp) BETWEEN @start_date AND @end_date \
             GROUP BY date \
             ORDER BY date",
            bucket_expression(granularity),
            self.table
        )
    }

    /// Fetch per-period download counts for `package` within `range`
    pub async fn fetch_download_counts(
        &self,
        package: &str,
        range: DateRange,
        granularity: Granularity,
    ) -> Result<Vec<DownloadRecord>> {
        // Re-validate; ranges can be built field by field
        DateRange::new(range.start, range.end)?;

        info!(
            "Querying {} downloads for {} ({})",
            granularity, package, range
        );

        let request = QueryRequest {
            query: self.download_query(granularity),
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: vec![
                QueryParameter::new("package_name", "STRING", package.to_string()),
                QueryParameter::new("start_date", "DATE", range.start.to_string()),
                QueryParameter::new("end_date", "DATE", range.end.to_string()),
            ],
            timeout_ms: self.wait_ms(),
        };

        let url = format!("{}/projects/{}/queries", self.api_base, self.project_id);
        let mut response = self
            .execute(self.client.post(&url).json(&request), &url)
            .await?;

        let mut rows = Vec::new();
        let mut polls = 0;
        loop {
            if let Some(errors) = response.errors.take().filter(|e| !e.is_empty()) {
                let message = errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                // Errors without any result are fatal; otherwise they are warnings
                if response.job_complete && response.rows.is_none() && response.schema.is_none() {
                    return Err(Error::UpstreamQuery(message));
                }
                warn!("Warehouse reported for {}: {}", package, message);
            }

            if response.job_complete {
                for row in response.rows.take().unwrap_or_default() {
                    rows.push(parse_row(&row)?);
                }
                if response.page_token.is_none() {
                    break;
                }
            }

            polls += 1;
            if polls > self.max_polls {
                return Err(Error::UpstreamQuery(format!(
                    "query results not available after {} polls",
                    self.max_polls
                )));
            }

            let job = response
                .job_reference
                .as_ref()
                .ok_or_else(|| Error::UpstreamQuery("response has no job reference".to_string()))?;
            let url = format!(
                "{}/projects/{}/queries/{}",
                self.api_base, job.project_id, job.job_id
            );

            let mut query: Vec<(&str, String)> = vec![("timeoutMs", self.wait_ms().to_string())];
            if let Some(location) = &job.location {
                query.push(("location", location.clone()));
            }
            if let Some(token) = &response.page_token {
                query.push(("pageToken", token.clone()));
            }

            debug!("Polling query results (poll {})", polls);
            response = self.execute(self.client.get(&url).query(&query), &url).await?;
        }

        let records = normalize_downloads(rows, granularity);
        debug!("Received {} {} buckets for {}", records.len(), granularity, package);
        Ok(records)
    }

    fn wait_ms(&self) -> u64 {
        u64::try_from(self.query_wait.as_millis()).unwrap_or(u64::MAX)
    }

    async fn execute(&self, request: reqwest::RequestBuilder, url: &str) -> Result<QueryResponse> {
        let token = self.tokens.bearer().await?;
        let resp = request
            .bearer_auth(token)
            .timeout(self.query_wait + QUERY_WAIT_MARGIN)
            .send()
            .await
            .map_err(|e| Error::from_transport(url, e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::from_transport(url, e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(Error::UpstreamQuery(message));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Truncation expression used for both the selected period and the group key
pub fn bucket_expression(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Hourly => "DATETIME_TRUNC(DATETIME(timestamp), HOUR)",
        Granularity::Daily => "DATE(timestamp)",
        Granularity::Weekly => "DATE_TRUNC(DATE(timestamp), WEEK)",
        Granularity::Monthly => "DATE_TRUNC(DATE(timestamp), MONTH)",
    }
}

fn parse_row(row: &Row) -> Result<(NaiveDateTime, u64)> {
    let cell = |i: usize| row.f.get(i).and_then(|c| c.v.as_str());

    let period = cell(0)
        .ok_or_else(|| Error::UpstreamQuery("row is missing the date column".to_string()))?;
    let downloads = cell(1)
        .ok_or_else(|| Error::UpstreamQuery("row is missing the downloads column".to_string()))?;

    let period = parse_period(period)?;
    let downloads = downloads.parse::<u64>().map_err(|_| pkgpulse_core::Error::ParseError {
        what: "download count",
        value: downloads.to_string(),
    })?;

    Ok((period, downloads))
}

/// Parse a DATE (`2024-01-31`) or DATETIME (`2024-01-31T05:00:00`) cell
fn parse_period(value: &str) -> Result<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| {
            pkgpulse_core::Error::ParseError {
                what: "warehouse period",
                value: value.to_string(),
            }
            .into()
        })
}

// Warehouse wire types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<QueryParameter>,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    name: &'static str,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

impl QueryParameter {
    fn new(name: &'static str, kind: &'static str, value: String) -> Self {
        Self {
            name,
            parameter_type: ParameterType { kind },
            parameter_value: ParameterValue { value },
        }
    }
}

#[derive(Debug, Serialize)]
struct ParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ParameterValue {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    rows: Option<Vec<Row>>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<Vec<ErrorProto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorProto,
}
