//! Forwards Confluent Cloud metrics to Google Cloud Monitoring.
//!
//! Each scrape cycle fetches the Confluent metrics export, parses the text
//! exposition and publishes every measurement that matches a configured
//! filter as a custom metric:
//!
//! ```text
//! custom.googleapis.com/<namespace>/<metric_name>_<suffix>
//! ```
//!
//! Descriptors are created the first time a type is seen. Measurements that
//! match no filter, and types whose descriptor could not be created, are
//! skipped for the rest of the process lifetime.

pub mod config;
pub mod confluent;
pub mod exposition;
pub mod monitoring;
pub mod object_model;
pub mod resolver;
pub mod scraper;

pub use config::ConfluentWorkerConfig;
pub use scraper::{CycleStats, Schedule, ScrapeError, Scraper};
