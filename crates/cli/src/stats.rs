//! Lifetime download totals from the public statistics endpoint

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::{send_with_retry, RetryPolicy};

#[derive(Debug, Deserialize)]
struct OverallResponse {
    #[serde(default)]
    data: Vec<OverallRow>,
}

#[derive(Debug, Deserialize)]
struct OverallRow {
    #[serde(default)]
    downloads: u64,
}

/// Client for `GET /packages/{package}/overall`
#[derive(Debug, Clone)]
pub struct StatsClient {
    client: reqwest::Client,
    api_base: String,
    retry: RetryPolicy,
}

impl StatsClient {
    pub fn new(client: reqwest::Client, api_base: &str, retry: RetryPolicy) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Sum of `downloads` over every row the endpoint reports.
    ///
    /// Transient failures are retried; a 404 (unknown package) is not.
    pub async fn fetch_lifetime_downloads(&self, package: &str) -> Result<u64> {
        let url = format!("{}/packages/{}/overall", self.api_base, package);
        let resp = send_with_retry(self.client.get(&url), &url, &self.retry).await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamHttp {
                url,
                status: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body: OverallResponse = resp.json().await.map_err(|e| Error::from_transport(&url, e))?;
        let total = body.data.iter().map(|row| row.downloads).sum();
        debug!("{} has {} lifetime downloads", package, total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StatsClient {
        StatsClient::new(
            reqwest::Client::new(),
            &server.uri(),
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_sums_all_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/widget/overall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"category": "with_mirrors", "date": "2024-01-01", "downloads": 100},
                    {"category": "without_mirrors", "date": "2024-01-01", "downloads": 40},
                    {"category": "with_mirrors", "date": "2024-01-02", "downloads": 60}
                ],
                "package": "widget",
                "type": "overall_downloads"
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).fetch_lifetime_downloads("widget").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/nope/overall"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).fetch_lifetime_downloads("nope").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamHttp { status: Some(404), .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/widget/overall"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/packages/widget/overall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"downloads": 7}]
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).fetch_lifetime_downloads("widget").await.unwrap(), 7);
    }
}
