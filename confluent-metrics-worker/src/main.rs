//! Confluent Cloud metrics worker.
//!
//! Scrapes the Confluent metrics export on a fixed schedule and republishes
//! the configured metrics to Google Cloud Monitoring.

use anyhow::{Context, Result};
use confluent_metrics_worker::confluent::ConfluentClient;
use confluent_metrics_worker::monitoring::MonitoringClient;
use confluent_metrics_worker::resolver::MetricTypeResolver;
use confluent_metrics_worker::{ConfluentWorkerConfig, Schedule, Scraper};
use metrics_worker_framework::{WorkerArgs, WorkerConfig, WorkerRunner, WorkerStatus};
use tracing::info;

const DEFAULT_CONFIG: &str = "confluent-metrics-worker.json5";

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse_with_default(DEFAULT_CONFIG);

    let config = ConfluentWorkerConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if args.check {
        println!("Configuration {:?} is valid", args.config);
        return Ok(());
    }

    let mut runner =
        WorkerRunner::new_with_args("confluent-metrics-worker", config, Some(&args))?
            .with_version(env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", args.config);

    let config = runner.config();
    let resource_ids = config.resource_ids();
    let source = ConfluentClient::new(&config.confluent, &resource_ids)
        .context("Failed to create Confluent client")?;
    info!(url = %source.export_url(), "Confluent export client ready");

    let sink = MonitoringClient::from_config(&config.monitoring)
        .context("Failed to create Cloud Monitoring client")?;
    info!(project = %sink.project_id(), "Cloud Monitoring client ready");

    let resolver = MetricTypeResolver::new(config);
    info!(
        prefix = %resolver.type_prefix(),
        types = resolver.configured_types().len(),
        "Metric types resolved from configuration"
    );
    let schedule = Schedule::from_config(&config.scrape);

    let scraper = Scraper::new(source, sink, resolver)
        .await
        .context("Failed to seed existing metric descriptors")?;

    let shutdown = runner.shutdown_receiver();
    runner.spawn("scraper", async move {
        scraper.run(schedule, shutdown).await;
    });

    runner.serve_status(WorkerStatus::ok(
        "Confluent Metrics Worker",
        env!("CARGO_PKG_VERSION"),
        option_env!("BUILD_DATE"),
    ))?;

    runner.run().await?;
    Ok(())
}
