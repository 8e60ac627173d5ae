//! Maps a measurement's labels to the custom metric type it is published under.

use std::collections::{HashMap, HashSet};

use crate::config::{ConfluentWorkerConfig, METRIC_TYPE_PREFIX, Unit};

/// Derive `prefix/namespace/metric_suffix`.
pub fn metric_type(prefix: &str, namespace: &str, metric_name: &str, suffix: &str) -> String {
    format!("{}/{}/{}_{}", prefix, namespace, metric_name, suffix)
}

#[derive(Debug, Clone)]
struct ResolvedFilter {
    labels: Vec<(String, String)>,
    metric_type: String,
}

impl ResolvedFilter {
    fn matches(&self, labels: &[(String, String)]) -> bool {
        self.labels
            .iter()
            .all(|(key, value)| labels.iter().any(|(k, v)| k == key && v == value))
    }
}

/// Resolves measurements against the configured filters.
///
/// Built once from a validated configuration.
#[derive(Debug, Clone)]
pub struct MetricTypeResolver {
    type_prefix: String,
    filters: HashMap<String, Vec<ResolvedFilter>>,
    configured_types: HashSet<String>,
    units: HashMap<String, Unit>,
}

impl MetricTypeResolver {
    pub fn new(config: &ConfluentWorkerConfig) -> Self {
        let namespace = config.monitoring.namespace();
        let mut filters: HashMap<String, Vec<ResolvedFilter>> = HashMap::new();
        let mut configured_types = HashSet::new();
        let mut units = HashMap::new();

        for metric in config.resources.iter().flat_map(|r| &r.metrics) {
            if let Some(unit) = metric.parsed_unit() {
                units.insert(metric.metric_name.clone(), unit);
            }

            let resolved = filters.entry(metric.metric_name.clone()).or_default();
            for filter in &metric.filters {
                let metric_type = metric_type(
                    METRIC_TYPE_PREFIX,
                    namespace,
                    &metric.metric_name,
                    &filter.suffix,
                );
                configured_types.insert(metric_type.clone());
                resolved.push(ResolvedFilter {
                    labels: filter
                        .labels
                        .iter()
                        .map(|l| (l.key.clone(), l.value.clone()))
                        .collect(),
                    metric_type,
                });
            }
        }

        Self {
            type_prefix: format!("{}/{}", METRIC_TYPE_PREFIX, namespace),
            filters,
            configured_types,
            units,
        }
    }

    /// The metric type of the first filter whose labels all appear in `labels`.
    ///
    /// Extra measurement labels are ignored. `None` means the measurement is
    /// outside the configured scope.
    pub fn resolve(&self, metric_name: &str, labels: &[(String, String)]) -> Option<&str> {
        self.filters
            .get(metric_name)?
            .iter()
            .find(|f| f.matches(labels))
            .map(|f| f.metric_type.as_str())
    }

    /// Whether `metric_type` is derivable from the configuration.
    pub fn is_configured(&self, metric_type: &str) -> bool {
        self.configured_types.contains(metric_type)
    }

    /// Every metric type derivable from the configuration.
    pub fn configured_types(&self) -> &HashSet<String> {
        &self.configured_types
    }

    /// The configured unit of a metric, if any.
    pub fn unit(&self, metric_name: &str) -> Option<Unit> {
        self.units.get(metric_name).copied()
    }

    /// `prefix/namespace`, shared by every configured type.
    pub fn type_prefix(&self) -> &str {
        &self.type_prefix
    }
}
