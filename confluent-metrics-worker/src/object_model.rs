//! Catalog of the Confluent Cloud resource kinds and the metrics they export.
//!
//! See <https://api.telemetry.confluent.cloud/docs#section/Object-Model/Metrics>.

/// A metric exported for a resource kind, with the label keys every sample carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricModel {
    pub name: &'static str,
    pub labels: &'static [&'static str],
}

/// A resource kind and its metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceModel {
    pub kind: &'static str,
    pub metrics: &'static [MetricModel],
}

const fn metric(name: &'static str, labels: &'static [&'static str]) -> MetricModel {
    MetricModel { name, labels }
}

// TODO: add ksql and schema_registry once their export labels are pinned down.
pub static OBJECT_MODEL: &[ResourceModel] = &[
    ResourceModel {
        kind: "kafka",
        metrics: &[
            metric("confluent_kafka_server_received_bytes", &["kafka_id", "topic"]),
            metric("confluent_kafka_server_sent_bytes", &["kafka_id", "topic"]),
            metric("confluent_kafka_server_received_records", &["kafka_id", "topic"]),
            metric("confluent_kafka_server_sent_records", &["kafka_id", "topic"]),
            metric("confluent_kafka_server_retained_bytes", &["kafka_id", "topic"]),
            metric(
                "confluent_kafka_server_active_connection_count",
                &["kafka_id", "principal_id"],
            ),
            metric(
                "confluent_kafka_server_request_count",
                &["kafka_id", "principal_id", "type"],
            ),
            metric("confluent_kafka_server_partition_count", &["kafka_id"]),
            metric(
                "confluent_kafka_server_successful_authentication_count",
                &["kafka_id", "principal_id"],
            ),
        ],
    },
    ResourceModel {
        kind: "connector",
        metrics: &[
            metric("confluent_kafka_connect_sent_records", &["connector_id"]),
            metric("confluent_kafka_connect_received_records", &["connector_id"]),
            metric("confluent_kafka_connect_sent_bytes", &["connector_id"]),
            metric("confluent_kafka_connect_received_bytes", &["connector_id"]),
            metric(
                "confluent_kafka_connect_dead_letter_queue_records",
                &["connector_id"],
            ),
        ],
    },
];

/// Look up a resource kind.
pub fn resource(kind: &str) -> Option<&'static ResourceModel> {
    OBJECT_MODEL.iter().find(|r| r.kind == kind)
}

/// Iterate over every `(kind, metric)` pair in the catalog.
pub fn all_metrics() -> impl Iterator<Item = (&'static str, &'static MetricModel)> {
    OBJECT_MODEL
        .iter()
        .flat_map(|r| r.metrics.iter().map(move |m| (r.kind, m)))
}

/// The label that carries a resource's id, e.g. `kafka_id` for `kafka`.
pub fn resource_id_label(kind: &str) -> String {
    format!("{}_id", kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_globally_unique() {
        let mut seen = HashSet::new();
        for (_, m) in all_metrics() {
            assert!(seen.insert(m.name), "duplicate metric {}", m.name);
        }
    }

    #[test]
    fn test_every_metric_carries_its_resource_id() {
        for (kind, m) in all_metrics() {
            assert!(
                m.labels.contains(&resource_id_label(kind).as_str()),
                "{} lacks {}_id",
                m.name,
                kind
            );
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(resource("kafka").unwrap().metrics.len(), 9);
        assert_eq!(resource("connector").unwrap().metrics.len(), 5);
        assert!(resource("ksql").is_none());
    }
}
