//! Configuration traits and shared configuration sections.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkerError};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
///
/// Each enabled sink gets its own formatting layer; all sinks share the
/// level filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,

    /// Write log records to stdout.
    #[serde(default = "default_stdout")]
    pub stdout: bool,

    /// Append log records to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stdout() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            stdout: default_stdout(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Whether at least one sink is enabled.
    pub fn has_sink(&self) -> bool {
        self.stdout || self.file.is_some()
    }
}

/// Status HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// How long in-flight requests may drain after shutdown (seconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_grace() -> u64 {
    3
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Trait for worker configuration types.
///
/// Implement this trait for your worker's configuration struct to get
/// loading from JSON5, a hook for environment overrides, and validation.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use metrics_worker_framework::{LoggingConfig, StatusConfig, WorkerConfig, WorkerError};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyWorkerConfig {
///     #[serde(default)]
///     pub logging: LoggingConfig,
///     #[serde(default)]
///     pub status: StatusConfig,
///     pub targets: Vec<String>,
/// }
///
/// impl WorkerConfig for MyWorkerConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn status(&self) -> &StatusConfig {
///         &self.status
///     }
///
///     fn validate_config(&self) -> Result<(), WorkerError> {
///         if self.targets.is_empty() {
///             return Err(WorkerError::validation("At least one target required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait WorkerConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the status endpoint configuration.
    fn status(&self) -> &StatusConfig;

    /// Fill in values from the process environment.
    ///
    /// Called after parsing and before validation.
    fn apply_env(&mut self) {}

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    /// Parse configuration from a JSON5 string.
    fn parse(content: &str) -> Result<Self> {
        let mut config: Self = parse_config(content)?;
        config.apply_env();
        config.validate_config()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate_config`](Self::validate_config) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(WorkerError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

/// Parse any deserializable value from a JSON5 string without validation.
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(json5::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        status: StatusConfig,
        #[serde(default)]
        targets: Vec<String>,
    }

    impl WorkerConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn status(&self) -> &StatusConfig {
            &self.status
        }

        fn validate_config(&self) -> Result<()> {
            if self.targets.is_empty() {
                return Err(WorkerError::validation("At least one target required"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(WorkerError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_defaults() {
        let config = TestConfig::parse(r#"{ targets: ["a"] }"#).unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.logging.stdout);
        assert!(config.logging.file.is_none());
        assert_eq!(config.status.listen, "0.0.0.0:8080");
        assert_eq!(config.status.shutdown_grace_secs, 3);
    }

    #[test]
    fn test_json_logging_to_file() {
        let json5 = r#"
        {
            targets: ["a"],
            logging: {
                level: "debug",
                format: "json",
                stdout: false,
                file: "/var/log/worker.log",
            },
        }
        "#;

        let config = TestConfig::parse(json5).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.stdout);
        assert_eq!(
            config.logging.file.as_deref(),
            Some(Path::new("/var/log/worker.log"))
        );
        assert!(config.logging.has_sink());
    }

    #[test]
    fn test_validation_runs_on_parse() {
        let result = TestConfig::parse("{}");
        assert!(matches!(result, Err(WorkerError::ConfigValidation(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = TestConfig::parse("{ targets: [");
        assert!(matches!(result, Err(WorkerError::ConfigParse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ targets: ["x"], status: {{ listen: "127.0.0.1:9000" }} }}"#).unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.targets, vec!["x"]);
        assert_eq!(config.status.listen, "127.0.0.1:9000");
    }
}
