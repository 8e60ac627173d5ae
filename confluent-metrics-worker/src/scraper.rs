//! Scrape loop: fetch the export, resolve each measurement, create missing
//! descriptors and publish points.

use std::collections::HashSet;
use std::ops::AddAssign;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ScrapeConfig, Unit};
use crate::confluent::{ConfluentError, ExportSource};
use crate::exposition::{self, Measurement, Metric, ParseError};
use crate::monitoring::{MetricDescriptor, MonitoringError, MonitoringSink, TimeSeriesPoint};
use crate::resolver::MetricTypeResolver;

/// Errors that abort a cycle, or startup.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to fetch metrics export: {0}")]
    Fetch(#[from] ConfluentError),
    #[error("failed to parse metrics export: {0}")]
    Parse(#[from] ParseError),
    #[error("failed to list existing metric descriptors: {0}")]
    Seed(#[from] MonitoringError),
}

/// When cycles run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Delay before the first cycle.
    pub initial_delay: Duration,
    /// Period between cycles.
    pub interval: Duration,
}

impl Schedule {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            interval: Duration::from_secs(config.interval_secs),
        }
    }
}

/// An entry in the skip cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SkipKey {
    /// A measurement no filter matched. Labels are sorted by key.
    Unresolved {
        metric_name: String,
        labels: Vec<(String, String)>,
    },
    /// An output type that is unknown to the configuration or whose
    /// descriptor could not be created.
    MetricType(String),
}

impl SkipKey {
    pub fn unresolved(metric_name: &str, labels: &[(String, String)]) -> Self {
        let mut labels = labels.to_vec();
        labels.sort();
        SkipKey::Unresolved {
            metric_name: metric_name.to_string(),
            labels,
        }
    }

    pub fn metric_type(metric_type: impl Into<String>) -> Self {
        SkipKey::MetricType(metric_type.into())
    }
}

/// Caches that live as long as the process. Entries are never evicted.
#[derive(Debug, Default, Clone)]
pub struct ScrapeState {
    known_types: HashSet<String>,
    skipped: HashSet<SkipKey>,
}

impl ScrapeState {
    /// State seeded with descriptor types that already exist.
    pub fn with_known_types(known_types: HashSet<String>) -> Self {
        Self {
            known_types,
            skipped: HashSet::new(),
        }
    }

    pub fn is_known(&self, metric_type: &str) -> bool {
        self.known_types.contains(metric_type)
    }

    pub fn mark_known(&mut self, metric_type: impl Into<String>) {
        self.known_types.insert(metric_type.into());
    }

    pub fn known_types(&self) -> &HashSet<String> {
        &self.known_types
    }

    pub fn is_skipped(&self, key: &SkipKey) -> bool {
        self.skipped.contains(key)
    }

    pub fn skip(&mut self, key: SkipKey) {
        self.skipped.insert(key);
    }

    pub fn skipped(&self) -> &HashSet<SkipKey> {
        &self.skipped
    }
}

/// Counters for one cycle, or accumulated over the process lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub measurements: u64,
    pub unresolved: u64,
    pub skipped: u64,
    pub descriptors_created: u64,
    pub descriptor_failures: u64,
    pub published: u64,
    pub publish_failures: u64,
}

impl AddAssign for CycleStats {
    fn add_assign(&mut self, other: Self) {
        self.measurements += other.measurements;
        self.unresolved += other.unresolved;
        self.skipped += other.skipped;
        self.descriptors_created += other.descriptors_created;
        self.descriptor_failures += other.descriptor_failures;
        self.published += other.published;
        self.publish_failures += other.publish_failures;
    }
}

/// Drives scrape cycles from an export source into a monitoring sink.
pub struct Scraper<S, M> {
    source: S,
    sink: M,
    resolver: MetricTypeResolver,
    state: ScrapeState,
    totals: CycleStats,
}

impl<S, M> Scraper<S, M>
where
    S: ExportSource,
    M: MonitoringSink,
{
    /// Create a scraper, seeding known descriptors from the sink.
    ///
    /// Fails if the existing descriptors cannot be listed.
    pub async fn new(source: S, sink: M, resolver: MetricTypeResolver) -> Result<Self, ScrapeError> {
        let known = sink.list_metric_types(resolver.type_prefix()).await?;
        info!(
            known = known.len(),
            prefix = %resolver.type_prefix(),
            "Seeded existing metric descriptors"
        );

        Ok(Self::with_state(
            source,
            sink,
            resolver,
            ScrapeState::with_known_types(known),
        ))
    }

    /// Create a scraper with pre-built caches.
    pub fn with_state(source: S, sink: M, resolver: MetricTypeResolver, state: ScrapeState) -> Self {
        Self {
            source,
            sink,
            resolver,
            state,
            totals: CycleStats::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &M {
        &self.sink
    }

    pub fn state(&self) -> &ScrapeState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ScrapeState {
        &mut self.state
    }

    /// Counters accumulated over every completed cycle.
    pub fn totals(&self) -> CycleStats {
        self.totals
    }

    /// Run one full cycle.
    ///
    /// Fetch and parse failures abort the cycle before any cache is touched.
    /// Per-measurement failures are logged and counted.
    pub async fn scrape_once(&mut self) -> Result<CycleStats, ScrapeError> {
        let payload = self.source.fetch_export().await?;
        let metrics = exposition::parse(&payload)?;

        let mut stats = CycleStats::default();
        for metric in &metrics {
            for measurement in &metric.measurements {
                stats.measurements += 1;
                self.process(metric, measurement, &mut stats).await;
            }
        }

        self.totals += stats;
        Ok(stats)
    }

    async fn process(&mut self, metric: &Metric, measurement: &Measurement, stats: &mut CycleStats) {
        let unresolved = SkipKey::unresolved(&metric.name, &measurement.labels);
        if self.state.is_skipped(&unresolved) {
            stats.skipped += 1;
            return;
        }

        let Some(metric_type) = self.resolver.resolve(&metric.name, &measurement.labels) else {
            self.state.skip(unresolved);
            stats.unresolved += 1;
            return;
        };
        let metric_type = metric_type.to_string();

        let type_key = SkipKey::metric_type(metric_type.as_str());
        if self.state.is_skipped(&type_key) {
            stats.skipped += 1;
            return;
        }

        if !self.resolver.is_configured(&metric_type) {
            warn!(metric_type = %metric_type, "Resolved type is not configured, skipping");
            self.state.skip(type_key);
            stats.skipped += 1;
            return;
        }

        if !self.state.is_known(&metric_type) {
            let descriptor = MetricDescriptor {
                metric_type: metric_type.clone(),
                display_name: metric.name.clone(),
                description: metric.description.clone(),
                unit: self.resolver.unit(&metric.name).map(Unit::as_monitoring_unit),
                label_keys: measurement.labels.iter().map(|(k, _)| k.clone()).collect(),
            };

            match self.sink.create_descriptor(&descriptor).await {
                Ok(()) => {
                    info!(metric_type = %metric_type, "Created metric descriptor");
                    self.state.mark_known(metric_type.clone());
                    stats.descriptors_created += 1;
                }
                Err(e) => {
                    error!(
                        metric = %metric.name,
                        metric_type = %metric_type,
                        error = %e,
                        "Failed to create metric descriptor, skipping type"
                    );
                    self.state.skip(type_key);
                    stats.descriptor_failures += 1;
                    return;
                }
            }
        }

        let point = TimeSeriesPoint {
            metric_type,
            labels: measurement.labels.clone(),
            value: measurement.value,
            timestamp: measurement.timestamp,
        };

        match self.sink.write_point(&point).await {
            Ok(()) => stats.published += 1,
            Err(e) => {
                warn!(metric_type = %point.metric_type, error = %e, "Failed to write time series");
                stats.publish_failures += 1;
            }
        }
    }

    async fn run_cycle(&mut self) {
        match self.scrape_once().await {
            Ok(stats) => debug!(
                measurements = stats.measurements,
                unresolved = stats.unresolved,
                skipped = stats.skipped,
                descriptors_created = stats.descriptors_created,
                descriptor_failures = stats.descriptor_failures,
                published = stats.published,
                publish_failures = stats.publish_failures,
                "Scrape cycle complete"
            ),
            Err(e) => error!(error = %e, "Scrape cycle failed"),
        }
    }

    /// Run cycles on `schedule` until `shutdown` carries `true`, returning
    /// the accumulated counters.
    ///
    /// A cycle in flight when shutdown arrives runs to completion.
    pub async fn run(mut self, schedule: Schedule, mut shutdown: watch::Receiver<bool>) -> CycleStats {
        info!(
            initial_delay_secs = schedule.initial_delay.as_secs(),
            interval_secs = schedule.interval.as_secs(),
            "Scraper started"
        );

        let mut ticker =
            tokio::time::interval_at(Instant::now() + schedule.initial_delay, schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let totals = self.totals;
        info!(
            measurements = totals.measurements,
            published = totals.published,
            descriptors_created = totals.descriptors_created,
            "Scraper stopped"
        );

        totals
    }
}
