//! Tracing initialisation with one layer per enabled sink.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, WorkerError};

type SinkLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize tracing with the given configuration.
///
/// Every enabled sink (stdout, file) gets a formatting layer in the
/// configured [`LogFormat`]. `RUST_LOG` takes precedence over the
/// configured level.
///
/// # Example
///
/// ```ignore
/// use metrics_worker_framework::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     format: LogFormat::Json,
///     ..Default::default()
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(sink_layers(config)?)
        .with(filter)
        .try_init()
        .map_err(|e| WorkerError::Logging(e.to_string()))?;

    Ok(())
}

/// Build the formatting layers for every enabled sink.
fn sink_layers(config: &LoggingConfig) -> Result<Vec<SinkLayer>> {
    if !config.has_sink() {
        return Err(WorkerError::Logging("no log sink enabled".to_string()));
    }

    let mut layers: Vec<SinkLayer> = Vec::new();

    if config.stdout {
        let layer = match config.format {
            LogFormat::Text => fmt::layer().boxed(),
            LogFormat::Json => fmt::layer().json().boxed(),
        };
        layers.push(layer);
    }

    if let Some(path) = &config.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                WorkerError::Logging(format!("cannot open log file '{}': {}", path.display(), e))
            })?;
        let writer = Mutex::new(file);

        let layer = match config.format {
            LogFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
            LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        };
        layers.push(layer);
    }

    Ok(layers)
}
