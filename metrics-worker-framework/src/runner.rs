//! Worker runner for lifecycle management.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::WorkerArgs;
use crate::config::{LoggingConfig, WorkerConfig};
use crate::error::{Result, WorkerError};
use crate::logging::init_tracing;
use crate::status::{StatusServer, WorkerStatus};

/// Worker runner that manages the lifecycle of a worker process.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Cooperative shutdown on Ctrl+C / SIGTERM
/// - The status HTTP server
///
/// Shutdown is cooperative: spawned tasks receive the signal through
/// [`shutdown_receiver`](Self::shutdown_receiver) and are awaited, never
/// aborted.
///
/// # Example
///
/// ```ignore
/// use metrics_worker_framework::{WorkerArgs, WorkerConfig, WorkerRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = WorkerArgs::parse_with_default("myworker.json5");
///     let config = MyWorkerConfig::load(&args.config)?;
///
///     let mut runner = WorkerRunner::new_with_args("myworker", config, Some(&args))?;
///
///     let shutdown = runner.shutdown_receiver();
///     runner.spawn("poller", async move {
///         // Worker logic here, exit once `shutdown` flips to true
///     });
///
///     runner.run().await?;
///     Ok(())
/// }
/// ```
pub struct WorkerRunner<C: WorkerConfig> {
    /// Worker name for logging and status.
    name: String,
    /// Worker version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Broadcasts `true` once shutdown begins.
    shutdown_tx: watch::Sender<bool>,
    /// Spawned tasks, by name.
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl<C: WorkerConfig> WorkerRunner<C> {
    /// Create a new worker runner and initialize logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new worker runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&WorkerArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config)?;

        let runner = Self::without_logging(name, config);
        tracing::info!(worker = %runner.name, version = %runner.version, "Starting worker");

        Ok(runner)
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_logging(name: impl Into<String>, config: C) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Override the reported version (defaults to the framework version).
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Get the worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the worker version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a receiver that flips to `true` when shutdown begins.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Number of spawned tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn a worker task.
    ///
    /// The task is awaited on shutdown.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push((name.into(), handle));
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let worker = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %worker, error = %e, "Worker failed");
            }
        });
        self.tasks.push((name, handle));
    }

    /// Spawn the status HTTP server described by the config's `status` section.
    pub fn serve_status(&mut self, status: WorkerStatus) -> Result<()> {
        let status_config = self.config.status();
        let listen_addr: SocketAddr = status_config.listen.parse().map_err(|e| {
            WorkerError::config(format!(
                "Invalid status listen address '{}': {}",
                status_config.listen, e
            ))
        })?;
        let grace = Duration::from_secs(status_config.shutdown_grace_secs);

        let server = StatusServer::new(listen_addr, status, grace);
        let shutdown = self.shutdown_receiver();
        self.spawn_with_error("status-server", server.run(shutdown));

        Ok(())
    }

    /// Run the worker until Ctrl+C or SIGTERM is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Run the worker until `signal` resolves.
    ///
    /// This will:
    /// 1. Wait for the signal
    /// 2. Broadcast shutdown to all tasks
    /// 3. Wait for every task to finish
    ///
    /// Returns [`WorkerError::Worker`] naming any task that panicked.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            worker = %self.name,
            tasks = self.tasks.len(),
            "Worker running. Press Ctrl+C to stop."
        );

        signal.await;

        tracing::info!(worker = %self.name, "Received shutdown signal");

        // Receivers may already be gone if every task exited early.
        let _ = self.shutdown_tx.send(true);

        let mut failed = Vec::new();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(task = %name, error = %e, "Task panicked or was cancelled");
                failed.push(name);
            } else {
                tracing::debug!(task = %name, "Task finished");
            }
        }

        tracing::info!(worker = %self.name, "Goodbye!");

        if !failed.is_empty() {
            return Err(WorkerError::worker(format!(
                "task(s) did not finish cleanly: {}",
                failed.join(", ")
            )));
        }
        Ok(())
    }
}

/// Wait for Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatusConfig;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Deserialize, Default)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        status: StatusConfig,
    }

    impl WorkerConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn status(&self) -> &StatusConfig {
            &self.status
        }
    }

    #[tokio::test]
    async fn test_tasks_observe_shutdown_and_are_awaited() {
        let mut runner = WorkerRunner::without_logging("test", TestConfig::default());
        let finished = Arc::new(AtomicBool::new(false));

        let mut shutdown = runner.shutdown_receiver();
        let flag = finished.clone();
        runner.spawn("waiter", async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            // Simulates finishing an in-flight cycle after the signal.
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(runner.task_count(), 1);

        runner.run_until(async {}).await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicked_task_fails_run() {
        let mut runner = WorkerRunner::without_logging("test", TestConfig::default());
        runner.spawn("healthy", async {});
        runner.spawn("broken", async { panic!("boom") });

        let err = runner.run_until(async {}).await.unwrap_err();
        match err {
            WorkerError::Worker(msg) => {
                assert!(msg.contains("broken"));
                assert!(!msg.contains("healthy"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_with_error_logs_and_completes() {
        let mut runner = WorkerRunner::without_logging("test", TestConfig::default());
        runner.spawn_with_error("failing", async { Err::<(), _>("boom") });

        runner.run_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_status_rejects_bad_address() {
        let config = TestConfig {
            status: StatusConfig {
                listen: "not-an-address".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut runner = WorkerRunner::without_logging("test", config);

        let result = runner.serve_status(WorkerStatus::ok("Test", "0.0.0", None));
        assert!(matches!(result, Err(WorkerError::Config(_))));
    }

    #[tokio::test]
    async fn test_serve_status_and_shutdown() {
        let config = TestConfig {
            status: StatusConfig {
                listen: "127.0.0.1:0".to_string(),
                shutdown_grace_secs: 1,
            },
            ..Default::default()
        };
        let mut runner = WorkerRunner::without_logging("test", config).with_version("9.9.9");
        assert_eq!(runner.version(), "9.9.9");

        runner
            .serve_status(WorkerStatus::ok("Test", runner.version().to_string(), None))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), runner.run_until(async {}))
            .await
            .expect("runner did not stop")
            .unwrap();
    }
}
