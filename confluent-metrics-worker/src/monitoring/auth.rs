//! Service-account credentials and OAuth access tokens.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::MonitoringError;

/// OAuth scope for reading and writing Cloud Monitoring data.
pub const MONITORING_SCOPE: &str = "https://www.googleapis.com/auth/monitoring";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account key file the worker uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parse inline key JSON, or read it from the file `credentials` names.
    pub fn from_credentials(credentials: &str) -> Result<Self, MonitoringError> {
        let trimmed = credentials.trim();
        if trimmed.starts_with('{') {
            return Self::from_json(trimmed);
        }

        let content = std::fs::read_to_string(Path::new(trimmed)).map_err(|e| {
            MonitoringError::Credentials(format!("cannot read key file '{}': {}", trimmed, e))
        })?;
        Self::from_json(&content)
    }

    fn from_json(json: &str) -> Result<Self, MonitoringError> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| MonitoringError::Credentials(format!("invalid key JSON: {}", e)))?;
        if key.project_id.is_empty() {
            return Err(MonitoringError::Credentials("empty project_id".to_string()));
        }
        Ok(key)
    }
}

/// Supplies bearer tokens for API requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, MonitoringError>;
}

/// A fixed token, for emulators and tests.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, MonitoringError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Exchanges a signed JWT assertion for access tokens and caches them.
pub struct ServiceAccountTokens {
    client: Client,
    client_email: String,
    encoding_key: EncodingKey,
    token_uri: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: &ServiceAccountKey, client: Client) -> Result<Self, MonitoringError> {
        let client_email = key
            .client_email
            .clone()
            .ok_or_else(|| MonitoringError::Credentials("missing client_email".to_string()))?;
        let private_key = key
            .private_key
            .as_deref()
            .ok_or_else(|| MonitoringError::Credentials("missing private_key".to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| MonitoringError::Credentials(format!("invalid private_key: {}", e)))?;

        Ok(Self {
            client,
            client_email,
            encoding_key,
            token_uri: key
                .token_uri
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self) -> Result<String, MonitoringError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.client_email.clone(),
            scope: MONITORING_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| MonitoringError::Auth(format!("cannot sign assertion: {}", e)))
    }

    async fn fetch(&self) -> Result<TokenResponse, MonitoringError> {
        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitoringError::Auth(format!(
                "token endpoint returned {}: {}",
                status,
                body.trim()
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| MonitoringError::Auth(format!("invalid token response: {}", e)))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn token(&self) -> Result<String, MonitoringError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.token.clone());
        }

        let response = self.fetch().await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = response.expires_in, "Obtained access token");

        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(response.access_token)
    }
}
