//! Worker status reporting over HTTP.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Result, WorkerError};

/// Worker status document served on `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Human-readable worker name.
    #[serde(rename = "Info")]
    pub info: String,
    /// Build date, or "N/A" when unknown.
    #[serde(rename = "Build Date")]
    pub build_date: String,
    /// Worker version.
    #[serde(rename = "Version")]
    pub version: String,
    /// Always "ok" while the process is serving.
    #[serde(rename = "Status")]
    pub status: String,
}

impl WorkerStatus {
    /// Create an "ok" status.
    ///
    /// `raw_build_date` is a unix timestamp in seconds, typically taken from
    /// `option_env!("BUILD_DATE")` at compile time.
    pub fn ok(
        info: impl Into<String>,
        version: impl Into<String>,
        raw_build_date: Option<&str>,
    ) -> Self {
        Self {
            info: info.into(),
            build_date: format_build_date(raw_build_date),
            version: version.into(),
            status: "ok".to_string(),
        }
    }
}

/// Format a unix-seconds build timestamp as `Mon Jan 2 15:04:05 UTC 2006`.
fn format_build_date(raw: Option<&str>) -> String {
    raw.and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%a %b %-d %H:%M:%S UTC %Y").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    body: String,
}

/// Create the HTTP router.
fn create_router(status: &WorkerStatus) -> Result<Router> {
    let body = serde_json::to_string_pretty(status)?;
    let state = AppState { body };

    Ok(Router::new()
        .route("/", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(state))
}

/// Handler for the / endpoint.
async fn status_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        state.body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Status HTTP server.
pub struct StatusServer {
    listen_addr: SocketAddr,
    status: WorkerStatus,
    grace: Duration,
}

impl StatusServer {
    /// Create a new status server.
    pub fn new(listen_addr: SocketAddr, status: WorkerStatus, grace: Duration) -> Self {
        Self {
            listen_addr,
            status,
            grace,
        }
    }

    /// Run the server until the shutdown signal is received.
    ///
    /// After the signal, open connections get `grace` to drain before the
    /// server is dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = create_router(&self.status)?;

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| {
                WorkerError::Server(format!("Failed to bind to {}: {}", self.listen_addr, e))
            })?;

        info!(addr = %self.listen_addr, "Status server listening");

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_true(shutdown.clone()))
            .into_future();

        let grace = self.grace;
        let deadline = async move {
            wait_for_true(shutdown).await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = server => {
                result.map_err(|e| WorkerError::Server(e.to_string()))?;
                info!("Status server gracefully terminated");
            }
            _ = deadline => {
                warn!(grace_secs = grace.as_secs(), "Status server did not drain in time");
            }
        }

        Ok(())
    }
}

/// Resolve once the watch channel carries `true` or its sender is gone.
async fn wait_for_true(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
