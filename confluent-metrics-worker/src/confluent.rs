//! Client for the Confluent Cloud metrics export endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ConfluentConfig;

const EXPORT_PATH: [&str; 4] = ["v2", "metrics", "cloud", "export"];

/// Upstream export errors.
#[derive(Debug, Error)]
pub enum ConfluentError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("invalid base URL '{0}'")]
    InvalidUrl(String),
    #[error("export request timed out")]
    Timeout,
    #[error("export request failed: {0}")]
    Http(reqwest::Error),
    #[error("export returned {status}: {detail}")]
    Api { status: StatusCode, detail: String },
}

impl From<reqwest::Error> for ConfluentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ConfluentError::Timeout
        } else {
            ConfluentError::Http(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default)]
    detail: String,
}

/// Source of exposition text.
#[async_trait]
pub trait ExportSource: Send + Sync {
    /// Fetch the current export payload.
    async fn fetch_export(&self) -> Result<String, ConfluentError>;
}

/// HTTP client for `/v2/metrics/cloud/export`.
pub struct ConfluentClient {
    client: Client,
    export_url: Url,
    api_key: String,
    api_secret: String,
}

impl ConfluentClient {
    /// Create a client exporting the given `(kind, ids)` groups.
    pub fn new(
        config: &ConfluentConfig,
        resource_ids: &[(String, Vec<String>)],
    ) -> Result<Self, ConfluentError> {
        let client = Client::builder()
            .user_agent(concat!("confluent-metrics-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfluentError::Client(e.to_string()))?;

        let export_url = export_url(&config.base_url, resource_ids)?;

        Ok(Self {
            client,
            export_url,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    pub fn export_url(&self) -> &Url {
        &self.export_url
    }
}

/// Build the export URL with one `resource.<kind>.id` parameter per id.
fn export_url(
    base_url: &str,
    resource_ids: &[(String, Vec<String>)],
) -> Result<Url, ConfluentError> {
    let invalid = || ConfluentError::InvalidUrl(base_url.to_string());
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;

    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(EXPORT_PATH);

    if !resource_ids.is_empty() {
        let mut query = url.query_pairs_mut();
        for (kind, ids) in resource_ids {
            let key = format!("resource.{}.id", kind);
            for id in ids {
                query.append_pair(&key, id);
            }
        }
    }

    Ok(url)
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(response) if !response.errors.is_empty() => response
            .errors
            .iter()
            .map(|e| match &e.status {
                Some(serde_json::Value::String(status)) => format!("[{}] {}", status, e.detail),
                Some(status) => format!("[{}] {}", status, e.detail),
                None => e.detail.clone(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl ExportSource for ConfluentClient {
    async fn fetch_export(&self) -> Result<String, ConfluentError> {
        let response = self
            .client
            .get(self.export_url.clone())
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ConfluentError::Api {
                status,
                detail: error_detail(&body),
            });
        }

        debug!(bytes = body.len(), "Fetched metrics export");
        Ok(body)
    }
}
