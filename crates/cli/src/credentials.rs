//! Warehouse credentials
//!
//! The service account key is stored base64-encoded. Access tokens are
//! minted with the OAuth 2.0 JWT bearer grant and reused until shortly
//! before they expire.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const WAREHOUSE_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion, in seconds
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh tokens this many seconds before their reported expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Subset of a service account key file
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Decode a base64-encoded JSON key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = STANDARD.decode(encoded.trim())?;
        let key: Self = serde_json::from_slice(&raw).map_err(|e| {
            Error::Credentials(format!("service account key is not valid JSON: {e}"))
        })?;
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Source of bearer tokens for warehouse requests
#[derive(Debug)]
pub enum TokenSource {
    /// A pre-minted access token, used verbatim
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        client: reqwest::Client,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn service_account(key: ServiceAccountKey, client: reqwest::Client) -> Self {
        Self::ServiceAccount {
            key,
            client,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid access token, exchanging a fresh assertion when needed
    pub async fn bearer(&self) -> Result<String> {
        let (key, client, cached) = match self {
            Self::Static(token) => return Ok(token.clone()),
            Self::ServiceAccount {
                key,
                client,
                cached,
            } => (key, client, cached),
        };

        let mut guard = cached.lock().await;
        let now = Utc::now();
        if let Some(token) = guard.as_ref() {
            if token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        debug!("Exchanging service account assertion for {}", key.client_email);
        let assertion = sign_assertion(key, now)?;
        let resp = client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| Error::from_transport(&key.token_uri, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Credentials(format!(
                "token exchange failed with HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = resp.json().await?;
        let expires_at =
            now + Duration::seconds(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }
}

fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String> {
    let claims = Claims {
        iss: &key.client_email,
        scope: WAREHOUSE_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?)
}
