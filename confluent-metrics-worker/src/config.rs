//! Configuration for the Confluent metrics worker.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::str::FromStr;

use metrics_worker_framework::{LoggingConfig, StatusConfig, WorkerConfig, WorkerError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_model::{self, MetricModel};
use crate::resolver::metric_type;

/// Fixed prefix of every custom metric type.
pub const METRIC_TYPE_PREFIX: &str = "custom.googleapis.com";

/// Namespace used when `monitoring.metric_namespace` is not set.
pub const DEFAULT_METRIC_NAMESPACE: &str = "confluent";

/// Longest metric type Cloud Monitoring accepts.
pub const MAX_METRIC_TYPE_LEN: usize = 100;

pub const ENV_API_KEY: &str = "CONFLUENT_METRICS_API_KEY";
pub const ENV_API_SECRET: &str = "CONFLUENT_METRICS_API_SECRET";
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Configuration validation errors.
///
/// Every variant names the resource, metric, filter or label at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("must provide Confluent metrics api key")]
    MissingApiKey,
    #[error("must provide Confluent metrics api secret")]
    MissingApiSecret,
    #[error("must provide Google application credentials")]
    MissingCredentials,
    #[error("must provide some resources")]
    NoResources,
    #[error("missing resource name")]
    MissingResourceName,
    #[error("invalid resource name: {0}")]
    UnknownResource(String),
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),
    #[error("must provide at least one metric for resource: {0}")]
    NoMetrics(String),
    #[error("missing metric name for resource: {0}")]
    MissingMetricName(String),
    #[error("duplicate metric name {metric} for resource: {resource}")]
    DuplicateMetric { resource: String, metric: String },
    #[error("invalid unit {unit} for metric: {metric}")]
    InvalidUnit { metric: String, unit: String },
    #[error("invalid metric name: {0}")]
    UnknownMetric(String),
    #[error("invalid metric name {metric} for resource: {resource}")]
    MetricNotInResource { resource: String, metric: String },
    #[error("missing suffix for filter #{filter} of metric: {metric}")]
    MissingSuffix { metric: String, filter: usize },
    #[error("duplicate label {key} in filter '{suffix}' of metric: {metric}")]
    DuplicateFilterLabel {
        metric: String,
        suffix: String,
        key: String,
    },
    #[error("missing label {key} in filter '{suffix}' of metric: {metric}")]
    MissingFilterLabel {
        metric: String,
        suffix: String,
        key: String,
    },
    #[error("invalid label {key} in filter '{suffix}' of metric: {metric}")]
    ExtraneousFilterLabel {
        metric: String,
        suffix: String,
        key: String,
    },
    #[error("length of metric type {metric_type} for metric {metric} greater than 100 characters")]
    MetricTypeTooLong { metric: String, metric_type: String },
    #[error("duplicate metric type: {0}")]
    DuplicateMetricType(String),
    #[error("scrape interval must be greater than zero")]
    ZeroInterval,
    #[error("invalid status listen address: {0}")]
    InvalidListenAddress(String),
    #[error("at least one log sink (stdout or file) must be enabled")]
    NoLogSink,
}

/// Complete worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfluentWorkerConfig {
    /// Upstream metrics export settings.
    #[serde(default)]
    pub confluent: ConfluentConfig,

    /// Downstream Cloud Monitoring settings.
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Scrape schedule.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Status HTTP endpoint.
    #[serde(default)]
    pub status: StatusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Resources to forward, in resolution order.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Confluent Cloud metrics API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluentConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,

    #[serde(default, skip_serializing)]
    pub api_secret: String,

    /// Base URL of the telemetry API.
    #[serde(default = "default_confluent_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_confluent_base_url() -> String {
    "https://api.telemetry.confluent.cloud".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for ConfluentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: default_confluent_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Google Cloud Monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service-account JSON, inline or as a path to the key file.
    #[serde(default, skip_serializing)]
    pub credentials: String,

    /// Namespace segment of every metric type (default: "confluent").
    #[serde(default)]
    pub metric_namespace: Option<String>,

    /// Base URL of the Monitoring v3 REST API.
    #[serde(default = "default_monitoring_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Static bearer token, used instead of the service-account grant.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

fn default_monitoring_base_url() -> String {
    "https://monitoring.googleapis.com/v3".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            credentials: String::new(),
            metric_namespace: None,
            base_url: default_monitoring_base_url(),
            timeout_secs: default_timeout(),
            access_token: None,
        }
    }
}

impl MonitoringConfig {
    /// The configured namespace, or [`DEFAULT_METRIC_NAMESPACE`].
    pub fn namespace(&self) -> &str {
        match self.metric_namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => DEFAULT_METRIC_NAMESPACE,
        }
    }
}

/// Scrape schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Seconds between cycles (default: 60).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Seconds before the first cycle (default: 5).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
}

fn default_interval() -> u64 {
    60
}

fn default_initial_delay() -> u64 {
    5
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}

/// A Confluent resource kind and the metrics to forward for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub resource_name: String,

    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

/// A forwarded metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricConfig {
    #[serde(default)]
    pub metric_name: String,

    /// One of bit, byte, second, minute, hour, day, dimensionless.
    #[serde(default)]
    pub unit: Option<String>,

    /// Label filters, matched in order.
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Label values selecting measurements, and the suffix of their output type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub labels: Vec<Label>,

    #[serde(default)]
    pub suffix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// Engineering unit of a metric descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Bit,
    Byte,
    Second,
    Minute,
    Hour,
    Day,
    Dimensionless,
}

impl Unit {
    /// The UCUM code Cloud Monitoring expects.
    pub fn as_monitoring_unit(self) -> &'static str {
        match self {
            Unit::Bit => "bit",
            Unit::Byte => "By",
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Hour => "h",
            Unit::Day => "d",
            Unit::Dimensionless => "1",
        }
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bit" => Ok(Unit::Bit),
            "byte" => Ok(Unit::Byte),
            "second" => Ok(Unit::Second),
            "minute" => Ok(Unit::Minute),
            "hour" => Ok(Unit::Hour),
            "day" => Ok(Unit::Day),
            "dimensionless" => Ok(Unit::Dimensionless),
            other => Err(format!("unknown unit '{}'", other)),
        }
    }
}

impl MetricConfig {
    /// The parsed unit; `None` when unset or invalid.
    pub fn parsed_unit(&self) -> Option<Unit> {
        self.unit
            .as_deref()
            .filter(|u| !u.is_empty())
            .and_then(|u| u.parse().ok())
    }
}

impl ConfluentWorkerConfig {
    /// Fill empty credentials from environment lookups.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |field: &mut String, var: &str| {
            if field.is_empty()
                && let Some(value) = lookup(var).filter(|v| !v.is_empty())
            {
                *field = value;
            }
        };

        fill(&mut self.confluent.api_key, ENV_API_KEY);
        fill(&mut self.confluent.api_secret, ENV_API_SECRET);
        fill(&mut self.monitoring.credentials, ENV_CREDENTIALS);
    }

    /// Resource ids referenced by filters, grouped by kind in configuration order.
    ///
    /// The id of a `kafka` resource is the value of the filter label
    /// `kafka_id`, and so on.
    pub fn resource_ids(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();

        for resource in &self.resources {
            let id_key = object_model::resource_id_label(&resource.resource_name);
            let mut ids: Vec<String> = Vec::new();

            let filter_ids = resource
                .metrics
                .iter()
                .flat_map(|m| &m.filters)
                .flat_map(|f| &f.labels)
                .filter(|l| l.key == id_key);
            for label in filter_ids {
                if !ids.contains(&label.value) {
                    ids.push(label.value.clone());
                }
            }

            if !ids.is_empty() {
                grouped.push((resource.resource_name.clone(), ids));
            }
        }

        grouped
    }

    /// Validate the configuration against the object model.
    ///
    /// Checks run top-down and stop at the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.confluent.api_key.is_empty() {
            return Err(ValidationError::MissingApiKey);
        }
        if self.confluent.api_secret.is_empty() {
            return Err(ValidationError::MissingApiSecret);
        }
        if self.monitoring.credentials.is_empty() {
            return Err(ValidationError::MissingCredentials);
        }
        if self.resources.is_empty() {
            return Err(ValidationError::NoResources);
        }

        let index: HashMap<&str, (&str, &MetricModel)> = object_model::all_metrics()
            .map(|(kind, model)| (model.name, (kind, model)))
            .collect();

        let namespace = self.monitoring.namespace();
        let mut seen_resources = HashSet::new();
        let mut seen_types = HashSet::new();

        for resource in &self.resources {
            let kind = resource.resource_name.as_str();
            if kind.is_empty() {
                return Err(ValidationError::MissingResourceName);
            }
            if object_model::resource(kind).is_none() {
                return Err(ValidationError::UnknownResource(kind.to_string()));
            }
            if !seen_resources.insert(kind) {
                return Err(ValidationError::DuplicateResource(kind.to_string()));
            }
            if resource.metrics.is_empty() {
                return Err(ValidationError::NoMetrics(kind.to_string()));
            }

            let mut seen_metrics = HashSet::new();
            for metric in &resource.metrics {
                let name = metric.metric_name.as_str();
                if name.is_empty() {
                    return Err(ValidationError::MissingMetricName(kind.to_string()));
                }
                if !seen_metrics.insert(name) {
                    return Err(ValidationError::DuplicateMetric {
                        resource: kind.to_string(),
                        metric: name.to_string(),
                    });
                }
                if let Some(unit) = metric.unit.as_deref().filter(|u| !u.is_empty())
                    && unit.parse::<Unit>().is_err()
                {
                    return Err(ValidationError::InvalidUnit {
                        metric: name.to_string(),
                        unit: unit.to_string(),
                    });
                }

                let Some(&(owner, model)) = index.get(name) else {
                    return Err(ValidationError::UnknownMetric(name.to_string()));
                };
                if owner != kind {
                    return Err(ValidationError::MetricNotInResource {
                        resource: kind.to_string(),
                        metric: name.to_string(),
                    });
                }

                for (position, filter) in metric.filters.iter().enumerate() {
                    validate_filter(name, model, position + 1, filter)?;

                    let derived = metric_type(METRIC_TYPE_PREFIX, namespace, name, &filter.suffix);
                    if derived.len() > MAX_METRIC_TYPE_LEN {
                        return Err(ValidationError::MetricTypeTooLong {
                            metric: name.to_string(),
                            metric_type: derived,
                        });
                    }
                    if !seen_types.insert(derived.clone()) {
                        return Err(ValidationError::DuplicateMetricType(derived));
                    }
                }
            }
        }

        if self.scrape.interval_secs == 0 {
            return Err(ValidationError::ZeroInterval);
        }
        if self.status.listen.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress(
                self.status.listen.clone(),
            ));
        }
        if !self.logging.has_sink() {
            return Err(ValidationError::NoLogSink);
        }

        Ok(())
    }
}

fn validate_filter(
    metric: &str,
    model: &MetricModel,
    position: usize,
    filter: &Filter,
) -> Result<(), ValidationError> {
    if filter.suffix.is_empty() {
        return Err(ValidationError::MissingSuffix {
            metric: metric.to_string(),
            filter: position,
        });
    }

    let label_error = |key: &str| (metric.to_string(), filter.suffix.clone(), key.to_string());

    let mut keys = HashSet::new();
    for label in &filter.labels {
        if !keys.insert(label.key.as_str()) {
            let (metric, suffix, key) = label_error(&label.key);
            return Err(ValidationError::DuplicateFilterLabel {
                metric,
                suffix,
                key,
            });
        }
    }

    for required in model.labels {
        if !keys.contains(required) {
            let (metric, suffix, key) = label_error(required);
            return Err(ValidationError::MissingFilterLabel {
                metric,
                suffix,
                key,
            });
        }
    }

    if let Some(extra) = filter
        .labels
        .iter()
        .find(|l| !model.labels.contains(&l.key.as_str()))
    {
        let (metric, suffix, key) = label_error(&extra.key);
        return Err(ValidationError::ExtraneousFilterLabel {
            metric,
            suffix,
            key,
        });
    }

    Ok(())
}

impl WorkerConfig for ConfluentWorkerConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn status(&self) -> &StatusConfig {
        &self.status
    }

    fn apply_env(&mut self) {
        self.apply_env_from(|var| std::env::var(var).ok());
    }

    fn validate_config(&self) -> Result<(), WorkerError> {
        self.validate()
            .map_err(|e| WorkerError::validation(e.to_string()))
    }
}
