//! Optional healthcheck endpoint.
//!
//! When `server.healthCheckPort` is configured, a tiny axum listener serves
//! `GET /health`: 200 `OK` when the upstream base URL answers within 5 s,
//! 503 otherwise. Anything beyond that single route is out of scope.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use monitor_core::error::{MonitorError, Result};
use tokio_util::sync::CancellationToken;

/// How long the upstream probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct HealthState {
    http: reqwest::Client,
    base_url: Arc<String>,
}

/// Serve `GET /health` on `port` until `cancel` fires.
pub async fn serve(port: u16, base_url: String, cancel: CancellationToken) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| MonitorError::Network {
            operation: "health-client".to_string(),
            detail: e.to_string(),
        })?;

    let state = HealthState {
        http,
        base_url: Arc::new(base_url),
    };
    let app = Router::new()
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// 200 when the upstream answers within the probe timeout, else 503.
async fn health(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    match state.http.get(state.base_url.as_str()).send().await {
        Ok(response) if response.status().is_success() => (StatusCode::OK, "OK"),
        Ok(response) => {
            tracing::debug!(status = %response.status(), "upstream probe returned non-success");
            (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable")
        }
        Err(e) => {
            tracing::debug!(error = %e, "upstream probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "upstream unreachable")
        }
    }
}
