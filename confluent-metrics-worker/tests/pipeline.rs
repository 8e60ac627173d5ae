//! End-to-end tests against fake Confluent and Cloud Monitoring servers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use confluent_metrics_worker::confluent::{ConfluentClient, ConfluentError, ExportSource};
use confluent_metrics_worker::monitoring::auth::{
    ServiceAccountKey, ServiceAccountTokens, TokenProvider,
};
use confluent_metrics_worker::monitoring::{MonitoringClient, MonitoringSink};
use confluent_metrics_worker::resolver::MetricTypeResolver;
use confluent_metrics_worker::{ConfluentWorkerConfig, ScrapeError, Scraper};
use metrics_worker_framework::WorkerConfig;
use serde_json::{Value, json};

const EXPORT: &str = "\
# HELP confluent_kafka_server_sent_bytes The delta count of bytes sent.
# TYPE confluent_kafka_server_sent_bytes gauge
confluent_kafka_server_sent_bytes{kafka_id=\"lkc-1\",topic=\"orders\",} 42.9 1700000000000
confluent_kafka_server_sent_bytes{kafka_id=\"lkc-2\",topic=\"orders\",} 5.0 1700000000000
# HELP confluent_kafka_server_partition_count The number of partitions.
# TYPE confluent_kafka_server_partition_count gauge
confluent_kafka_server_partition_count{kafka_id=\"lkc-1\",} 12.0 1700000000000
";

const SENT_TYPE: &str = "custom.googleapis.com/confluent/confluent_kafka_server_sent_bytes_sent";
const PARTITION_TYPE: &str =
    "custom.googleapis.com/confluent/confluent_kafka_server_partition_count_total";

#[derive(Default)]
struct Recorded {
    export_queries: Vec<String>,
    export_auth: Vec<String>,
    list_page_tokens: Vec<Option<String>>,
    monitoring_auth: Vec<String>,
    descriptors: Vec<Value>,
    time_series: Vec<Value>,
    token_requests: Vec<HashMap<String, String>>,
}

#[derive(Clone)]
struct Fake {
    recorded: Arc<Mutex<Recorded>>,
    export_status: StatusCode,
    reject_descriptors: bool,
}

impl Fake {
    fn new() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            export_status: StatusCode::OK,
            reject_descriptors: false,
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn export(
    State(fake): State<Fake>,
    headers: HeaderMap,
    uri: axum::http::Uri,
) -> impl IntoResponse {
    {
        let mut recorded = fake.recorded.lock().unwrap();
        recorded
            .export_queries
            .push(uri.query().unwrap_or_default().to_string());
        recorded.export_auth.push(header(&headers, "authorization"));
    }

    if fake.export_status != StatusCode::OK {
        let body = json!({ "errors": [{ "status": "403", "detail": "API key lacks MetricsViewer" }] });
        return (fake.export_status, [("content-type", "application/json")], body.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        EXPORT.to_string(),
    )
}

async fn list_descriptors(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let page_token = query.get("pageToken").cloned();
    {
        let mut recorded = fake.recorded.lock().unwrap();
        recorded.list_page_tokens.push(page_token.clone());
        recorded.monitoring_auth.push(header(&headers, "authorization"));
    }

    assert_eq!(
        query.get("filter").map(String::as_str),
        Some("metric.type = starts_with(\"custom.googleapis.com/confluent\")")
    );

    match page_token.as_deref() {
        None => Json(json!({
            "metricDescriptors": [{ "type": "custom.googleapis.com/confluent/stale_metric_x" }],
            "nextPageToken": "page-2",
        })),
        Some(_) => Json(json!({
            "metricDescriptors": [{ "type": PARTITION_TYPE }],
        })),
    }
}

async fn create_descriptor(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut recorded = fake.recorded.lock().unwrap();
    recorded.monitoring_auth.push(header(&headers, "authorization"));
    recorded.descriptors.push(body.clone());

    if fake.reject_descriptors {
        let error = json!({ "error": { "code": 400, "message": "Field labels had an invalid value" } });
        return (StatusCode::BAD_REQUEST, Json(error));
    }
    (StatusCode::OK, Json(body))
}

async fn write_time_series(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut recorded = fake.recorded.lock().unwrap();
    recorded.monitoring_auth.push(header(&headers, "authorization"));
    recorded.time_series.push(body);
    Json(json!({}))
}

async fn token(State(fake): State<Fake>, Form(form): Form<HashMap<String, String>>) -> Json<Value> {
    fake.recorded.lock().unwrap().token_requests.push(form);
    Json(json!({ "access_token": "sa-token", "expires_in": 3600, "token_type": "Bearer" }))
}

async fn spawn_server(fake: Fake) -> SocketAddr {
    let router = Router::new()
        .route("/v2/metrics/cloud/export", get(export))
        .route(
            "/v3/projects/demo-project/metricDescriptors",
            get(list_descriptors).post(create_descriptor),
        )
        .route("/v3/projects/demo-project/timeSeries", post(write_time_series))
        .route("/token", post(token))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr) -> ConfluentWorkerConfig {
    let json5 = format!(
        r#"{{
            confluent: {{ api_key: "key", api_secret: "secret", base_url: "http://{addr}", timeout_secs: 5 }},
            monitoring: {{
                credentials: '{{"project_id": "demo-project"}}',
                base_url: "http://{addr}/v3",
                access_token: "static-token",
                timeout_secs: 5,
            }},
            resources: [
                {{
                    resource_name: "kafka",
                    metrics: [
                        {{
                            metric_name: "confluent_kafka_server_sent_bytes",
                            unit: "byte",
                            filters: [
                                {{
                                    labels: [
                                        {{ key: "kafka_id", value: "lkc-1" }},
                                        {{ key: "topic", value: "orders" }},
                                    ],
                                    suffix: "sent",
                                }},
                            ],
                        }},
                        {{
                            metric_name: "confluent_kafka_server_partition_count",
                            filters: [{{ labels: [{{ key: "kafka_id", value: "lkc-1" }}], suffix: "total" }}],
                        }},
                    ],
                }},
            ],
        }}"#
    );
    ConfluentWorkerConfig::parse(&json5).unwrap()
}

async fn scraper(
    config: &ConfluentWorkerConfig,
) -> Result<Scraper<ConfluentClient, MonitoringClient>, ScrapeError> {
    let source = ConfluentClient::new(&config.confluent, &config.resource_ids()).unwrap();
    let sink = MonitoringClient::from_config(&config.monitoring).unwrap();
    Scraper::new(source, sink, MetricTypeResolver::new(config)).await
}

#[tokio::test]
async fn test_cycle_over_http() {
    let fake = Fake::new();
    let addr = spawn_server(fake.clone()).await;
    let config = config(addr);

    let mut scraper = scraper(&config).await.unwrap();
    assert!(scraper.state().is_known(PARTITION_TYPE));
    assert!(!scraper.state().is_known(SENT_TYPE));

    let stats = scraper.scrape_once().await.unwrap();
    assert_eq!(stats.measurements, 3);
    assert_eq!(stats.unresolved, 1);
    assert_eq!(stats.descriptors_created, 1);
    assert_eq!(stats.published, 2);

    let recorded = fake.recorded.lock().unwrap();

    assert_eq!(recorded.export_queries, vec!["resource.kafka.id=lkc-1"]);
    assert_eq!(recorded.export_auth, vec!["Basic a2V5OnNlY3JldA=="]);
    assert_eq!(recorded.list_page_tokens, vec![None, Some("page-2".to_string())]);
    assert!(
        recorded
            .monitoring_auth
            .iter()
            .all(|auth| auth == "Bearer static-token")
    );

    assert_eq!(recorded.descriptors.len(), 1);
    let descriptor = &recorded.descriptors[0];
    assert_eq!(descriptor["type"], SENT_TYPE);
    assert_eq!(descriptor["metricKind"], "GAUGE");
    assert_eq!(descriptor["valueType"], "INT64");
    assert_eq!(descriptor["unit"], "By");
    assert_eq!(descriptor["displayName"], "confluent_kafka_server_sent_bytes");
    assert_eq!(descriptor["description"], "The delta count of bytes sent.");
    assert_eq!(descriptor["labels"][0]["key"], "kafka_id");

    assert_eq!(recorded.time_series.len(), 2);
    let sent = &recorded.time_series[0]["timeSeries"][0];
    assert_eq!(sent["metric"]["type"], SENT_TYPE);
    assert_eq!(sent["metric"]["labels"]["topic"], "orders");
    assert_eq!(sent["resource"]["labels"]["project_id"], "demo-project");
    assert_eq!(sent["points"][0]["value"]["int64Value"], "42");
    assert_eq!(sent["points"][0]["interval"]["endTime"], "2023-11-14T22:13:20Z");

    let partitions = &recorded.time_series[1]["timeSeries"][0];
    assert_eq!(partitions["metric"]["type"], PARTITION_TYPE);
    assert_eq!(partitions["points"][0]["value"]["int64Value"], "12");
}

#[tokio::test]
async fn test_second_cycle_reuses_caches() {
    let fake = Fake::new();
    let addr = spawn_server(fake.clone()).await;
    let config = config(addr);

    let mut scraper = scraper(&config).await.unwrap();
    scraper.scrape_once().await.unwrap();
    let second = scraper.scrape_once().await.unwrap();

    assert_eq!(second.descriptors_created, 0);
    assert_eq!(second.unresolved, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.published, 2);

    let recorded = fake.recorded.lock().unwrap();
    assert_eq!(recorded.descriptors.len(), 1);
    assert_eq!(recorded.time_series.len(), 4);
}

#[tokio::test]
async fn test_upstream_error_aborts_cycle() {
    let fake = Fake {
        export_status: StatusCode::FORBIDDEN,
        ..Fake::new()
    };
    let addr = spawn_server(fake.clone()).await;
    let config = config(addr);

    let mut scraper = scraper(&config).await.unwrap();
    let err = scraper.scrape_once().await.unwrap_err();

    match err {
        ScrapeError::Fetch(ConfluentError::Api { status, detail }) => {
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(detail, "[403] API key lacks MetricsViewer");
        }
        other => panic!("unexpected error: {other}"),
    }

    let recorded = fake.recorded.lock().unwrap();
    assert!(recorded.descriptors.is_empty());
    assert!(recorded.time_series.is_empty());
}

#[tokio::test]
async fn test_rejected_descriptor_is_not_retried() {
    let fake = Fake {
        reject_descriptors: true,
        ..Fake::new()
    };
    let addr = spawn_server(fake.clone()).await;
    let config = config(addr);

    let mut scraper = scraper(&config).await.unwrap();
    let first = scraper.scrape_once().await.unwrap();
    let second = scraper.scrape_once().await.unwrap();

    assert_eq!(first.descriptor_failures, 1);
    assert_eq!(first.published, 1);
    assert_eq!(second.descriptor_failures, 0);
    assert_eq!(second.published, 1);

    let recorded = fake.recorded.lock().unwrap();
    assert_eq!(recorded.descriptors.len(), 1);
    assert!(
        recorded
            .time_series
            .iter()
            .all(|body| body["timeSeries"][0]["metric"]["type"] == PARTITION_TYPE)
    );
}

#[tokio::test]
async fn test_export_source_direct_fetch() {
    let fake = Fake::new();
    let addr = spawn_server(fake.clone()).await;
    let config = config(addr);

    let client = ConfluentClient::new(&config.confluent, &config.resource_ids()).unwrap();
    let payload = client.fetch_export().await.unwrap();
    assert_eq!(payload, EXPORT);
}

#[tokio::test]
async fn test_service_account_token_is_cached() {
    let fake = Fake::new();
    let addr = spawn_server(fake.clone()).await;

    let key_json = json!({
        "project_id": "demo-project",
        "client_email": "worker@demo-project.iam.gserviceaccount.com",
        "private_key": include_str!("fixtures/test-service-account.key"),
        "token_uri": format!("http://{addr}/token"),
    });
    let key = ServiceAccountKey::from_credentials(&key_json.to_string()).unwrap();
    let tokens = ServiceAccountTokens::new(&key, reqwest::Client::new()).unwrap();

    assert_eq!(tokens.token().await.unwrap(), "sa-token");
    assert_eq!(tokens.token().await.unwrap(), "sa-token");

    let recorded = fake.recorded.lock().unwrap();
    assert_eq!(recorded.token_requests.len(), 1);
    let form = &recorded.token_requests[0];
    assert_eq!(
        form.get("grant_type").map(String::as_str),
        Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
    );
    assert_eq!(form["assertion"].split('.').count(), 3);
}

#[tokio::test]
async fn test_monitoring_sink_lists_all_pages() {
    let fake = Fake::new();
    let addr = spawn_server(fake.clone()).await;
    let config = config(addr);

    let sink = MonitoringClient::from_config(&config.monitoring).unwrap();
    let types = sink
        .list_metric_types("custom.googleapis.com/confluent")
        .await
        .unwrap();

    assert_eq!(types.len(), 2);
    assert!(types.contains(PARTITION_TYPE));
}
