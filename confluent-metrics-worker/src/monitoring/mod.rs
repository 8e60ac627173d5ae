//! Google Cloud Monitoring v3 REST client.
//!
//! Only the three calls the worker needs: list custom metric descriptors,
//! create a descriptor, and write a single-point time series.

pub mod auth;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::MonitoringConfig;
use auth::{ServiceAccountKey, ServiceAccountTokens, StaticToken, TokenProvider};

/// Downstream monitoring errors.
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("invalid base URL '{0}'")]
    InvalidUrl(String),
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("monitoring request timed out")]
    Timeout,
    #[error("monitoring request failed: {0}")]
    Http(reqwest::Error),
    #[error("monitoring API returned {status}: {message}")]
    Api { status: StatusCode, message: String },
}

impl From<reqwest::Error> for MonitoringError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            MonitoringError::Timeout
        } else {
            MonitoringError::Http(e)
        }
    }
}

/// A gauge, INT64 metric descriptor with string labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub metric_type: String,
    pub display_name: String,
    pub description: String,
    /// UCUM unit code.
    pub unit: Option<&'static str>,
    pub label_keys: Vec<String>,
}

/// One integer sample of a gauge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesPoint {
    pub metric_type: String,
    pub labels: Vec<(String, String)>,
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

/// Destination of descriptors and points.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    /// Types of every existing descriptor whose type starts with `prefix`.
    async fn list_metric_types(&self, prefix: &str) -> Result<HashSet<String>, MonitoringError>;

    async fn create_descriptor(&self, descriptor: &MetricDescriptor) -> Result<(), MonitoringError>;

    async fn write_point(&self, point: &TimeSeriesPoint) -> Result<(), MonitoringError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDescriptorsResponse {
    #[serde(default)]
    metric_descriptors: Vec<DescriptorSummary>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptorSummary {
    #[serde(rename = "type")]
    metric_type: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// REST client for one project.
pub struct MonitoringClient {
    client: Client,
    base_url: Url,
    project_id: String,
    tokens: Box<dyn TokenProvider>,
}

impl MonitoringClient {
    /// Build a client from the `monitoring` configuration section.
    ///
    /// A configured `access_token` is used as-is; otherwise tokens come from
    /// the service-account key in `credentials`.
    pub fn from_config(config: &MonitoringConfig) -> Result<Self, MonitoringError> {
        let key = ServiceAccountKey::from_credentials(&config.credentials)?;

        let client = Client::builder()
            .user_agent(concat!("confluent-metrics-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MonitoringError::Client(e.to_string()))?;

        let tokens: Box<dyn TokenProvider> = match config.access_token.as_deref() {
            Some(token) if !token.is_empty() => Box::new(StaticToken::new(token)),
            _ => Box::new(ServiceAccountTokens::new(&key, client.clone())?),
        };

        Self::new(client, &config.base_url, key.project_id, tokens)
    }

    pub fn new(
        client: Client,
        base_url: &str,
        project_id: impl Into<String>,
        tokens: Box<dyn TokenProvider>,
    ) -> Result<Self, MonitoringError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| MonitoringError::InvalidUrl(base_url.to_string()))?;

        Ok(Self {
            client,
            base_url,
            project_id: project_id.into(),
            tokens,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// `{base}/projects/{project}/{collection}`.
    fn project_url(&self, collection: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["projects", self.project_id.as_str(), collection]);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, MonitoringError> {
        let token = self.tokens.token().await?;
        let response = request.bearer_auth(token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.trim().to_string());

        Err(MonitoringError::Api { status, message })
    }
}

fn descriptor_body(descriptor: &MetricDescriptor) -> serde_json::Value {
    let labels: Vec<_> = descriptor
        .label_keys
        .iter()
        .map(|key| json!({ "key": key, "valueType": "STRING" }))
        .collect();

    let mut body = json!({
        "type": descriptor.metric_type,
        "metricKind": "GAUGE",
        "valueType": "INT64",
        "labels": labels,
        "description": descriptor.description,
        "displayName": descriptor.display_name,
    });
    if let Some(unit) = descriptor.unit {
        body["unit"] = json!(unit);
    }
    body
}

fn time_series_body(project_id: &str, point: &TimeSeriesPoint) -> serde_json::Value {
    let labels: BTreeMap<&str, &str> = point
        .labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let at = point.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true);

    json!({
        "timeSeries": [{
            "metric": { "type": point.metric_type, "labels": labels },
            "resource": { "type": "global", "labels": { "project_id": project_id } },
            "points": [{
                "interval": { "startTime": at, "endTime": at },
                // Int64 travels as a JSON string.
                "value": { "int64Value": point.value.to_string() },
            }],
        }],
    })
}

#[async_trait]
impl MonitoringSink for MonitoringClient {
    async fn list_metric_types(&self, prefix: &str) -> Result<HashSet<String>, MonitoringError> {
        let filter = format!("metric.type = starts_with(\"{}\")", prefix);
        let mut types = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.project_url("metricDescriptors");
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("filter", &filter);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page: ListDescriptorsResponse =
                self.send(self.client.get(url)).await?.json().await?;
            types.extend(page.metric_descriptors.into_iter().map(|d| d.metric_type));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = types.len(), prefix = %prefix, "Listed metric descriptors");
        Ok(types)
    }

    async fn create_descriptor(&self, descriptor: &MetricDescriptor) -> Result<(), MonitoringError> {
        let request = self
            .client
            .post(self.project_url("metricDescriptors"))
            .json(&descriptor_body(descriptor));
        self.send(request).await?;
        Ok(())
    }

    async fn write_point(&self, point: &TimeSeriesPoint) -> Result<(), MonitoringError> {
        let request = self
            .client
            .post(self.project_url("timeSeries"))
            .json(&time_series_body(&self.project_id, point));
        self.send(request).await?;
        Ok(())
    }
}
