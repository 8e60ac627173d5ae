//! Metrics Worker Framework
//!
//! Common plumbing for long-running workers that poll a metrics source and
//! forward what they find somewhere else.
//!
//! # Overview
//!
//! This framework provides:
//! - [`WorkerConfig`] trait for configuration loading and validation
//! - [`WorkerRunner`] for managing worker lifecycle (startup, shutdown, signal handling)
//! - [`WorkerArgs`] for common CLI argument parsing
//! - [`StatusServer`] and [`WorkerStatus`] for the process status endpoint
//! - [`init_tracing`] for logging setup with one or more sinks
//!
//! # Example
//!
//! ```ignore
//! use metrics_worker_framework::{WorkerArgs, WorkerConfig, WorkerRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = WorkerArgs::parse_with_default("myworker.json5");
//!     let config = MyWorkerConfig::load(&args.config)?;
//!
//!     let mut runner = WorkerRunner::new_with_args("myworker", config, Some(&args))?;
//!     let shutdown = runner.shutdown_receiver();
//!     runner.spawn("poller", my_poller(shutdown));
//!
//!     // Run until Ctrl+C or SIGTERM
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod logging;
mod runner;
mod status;

pub use args::WorkerArgs;
pub use config::{LogFormat, LoggingConfig, StatusConfig, WorkerConfig, parse_config};
pub use error::{Result, WorkerError};
pub use logging::init_tracing;
pub use runner::{WorkerRunner, wait_for_shutdown_signal};
pub use status::{StatusServer, WorkerStatus};
