//! Runtime settings for the fetch layer
//!
//! Populated from command-line flags and their environment fallbacks in
//! `main`; tests build them directly against mock servers.

use std::time::Duration;

use crate::credentials::{ServiceAccountKey, TokenSource};
use crate::error::{Error, Result};
use crate::http::RetryPolicy;

pub const DEFAULT_WAREHOUSE_API: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_DOWNLOADS_TABLE: &str = "bigquery-public-data.pypi.file_downloads";
pub const DEFAULT_STATS_API: &str = "https://pypistats.org/api";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// 100 stargazers per page, so 400 pages covers 40k stars
pub const DEFAULT_MAX_STAR_PAGES: u32 = 400;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DOWNLOADS_TTL: Duration = Duration::from_secs(60 * 60 * 24);
const DEFAULT_REPOSITORY_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct WarehouseSettings {
    pub project_id: Option<String>,
    /// Base64-encoded service account JSON
    pub encoded_credentials: Option<String>,
    /// Pre-minted access token; takes precedence over the service account
    pub access_token: Option<String>,
    pub api_url: String,
    pub downloads_table: String,
    /// Maximum number of result polls/pages followed per query
    pub max_polls: u32,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            encoded_credentials: None,
            access_token: None,
            api_url: DEFAULT_WAREHOUSE_API.to_string(),
            downloads_table: DEFAULT_DOWNLOADS_TABLE.to_string(),
            max_polls: 20,
        }
    }
}

impl WarehouseSettings {
    /// Resolve the project id and token source.
    ///
    /// The project falls back to the one named in the service account key.
    pub fn resolve(&self, client: &reqwest::Client) -> Result<(String, TokenSource)> {
        let key = self
            .encoded_credentials
            .as_deref()
            .map(ServiceAccountKey::from_base64)
            .transpose()?;

        let project_id = self
            .project_id
            .clone()
            .or_else(|| key.as_ref().and_then(|k| k.project_id.clone()))
            .ok_or_else(|| Error::Config("warehouse project id is not set".to_string()))?;

        let source = match (&self.access_token, key) {
            (Some(token), _) => TokenSource::Static(token.clone()),
            (None, Some(key)) => TokenSource::service_account(key, client.clone()),
            (None, None) => {
                return Err(Error::Credentials(
                    "either a warehouse access token or encoded service account credentials are required"
                        .to_string(),
                ))
            }
        };

        Ok((project_id, source))
    }
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub token: Option<String>,
    pub api_url: String,
    pub max_star_pages: u32,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_GITHUB_API.to_string(),
            max_star_pages: DEFAULT_MAX_STAR_PAGES,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Expiry for download counts and lifetime totals
    pub downloads_ttl: Duration,
    /// Expiry for repository statistics
    pub repository_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            downloads_ttl: DEFAULT_DOWNLOADS_TTL,
            repository_ttl: DEFAULT_REPOSITORY_TTL,
        }
    }
}

/// All settings needed to build a [`crate::pipeline::Dashboard`]
#[derive(Debug, Clone)]
pub struct Settings {
    pub warehouse: WarehouseSettings,
    pub github: GitHubSettings,
    pub stats_api_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            warehouse: WarehouseSettings::default(),
            github: GitHubSettings::default(),
            stats_api_url: DEFAULT_STATS_API.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be greater than 0".to_string()));
        }
        if self.github.max_star_pages == 0 {
            return Err(Error::Config("max star pages must be at least 1".to_string()));
        }
        for (name, value) in [
            ("warehouse API URL", &self.warehouse.api_url),
            ("statistics API URL", &self.stats_api_url),
            ("GitHub API URL", &self.github.api_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("invalid {name} '{value}': {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    #[test]
    fn test_defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut settings = Settings::default();
        settings.github.api_url = "not a url".to_string();
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_pages_rejected() {
        let mut settings = Settings::default();
        settings.github.max_star_pages = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_resolve_prefers_access_token() {
        let warehouse = WarehouseSettings {
            project_id: Some("analytics".to_string()),
            access_token: Some("tok".to_string()),
            ..WarehouseSettings::default()
        };
        let (project, source) = warehouse.resolve(&reqwest::Client::new()).unwrap();
        assert_eq!(project, "analytics");
        assert!(matches!(source, TokenSource::Static(ref t) if t == "tok"));
    }

    #[test]
    fn test_resolve_project_from_key() {
        let key = serde_json::json!({
            "client_email": "reader@example.iam.gserviceaccount.com",
            "private_key": "unused",
            "project_id": "from-key"
        });
        let warehouse = WarehouseSettings {
            encoded_credentials: Some(STANDARD.encode(key.to_string())),
            ..WarehouseSettings::default()
        };
        let (project, source) = warehouse.resolve(&reqwest::Client::new()).unwrap();
        assert_eq!(project, "from-key");
        assert!(matches!(source, TokenSource::ServiceAccount { .. }));
    }

    #[test]
    fn test_resolve_requires_credentials() {
        let warehouse = WarehouseSettings {
            project_id: Some("analytics".to_string()),
            ..WarehouseSettings::default()
        };
        assert!(matches!(
            warehouse.resolve(&reqwest::Client::new()),
            Err(Error::Credentials(_))
        ));
    }
}
