//! The four toy pipeline services hosted by `stagehand-stage`.
//!
//! Each stage is an HTTP server with a `/status` endpoint plus one data
//! endpoint, and one background task doing its periodic work. Calls to the
//! upstream stage go through [`HealthPoller`], so they share the supervisor's
//! bounded retry shape.

pub mod consumer;
pub mod generator;
pub mod normalizer;
pub mod trainer;

use crate::error::{Result, StagehandError};
use crate::health::{HealthPoller, HealthResult, RetryPolicy};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

/// Status word of a stage that is ready to serve
pub const STATUS_ACTIVE: &str = "ativo";
/// Status word of a stage still waiting for upstream data
pub const STATUS_WAITING: &str = "aguardando";

/// Runtime options shared by every stage
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub port: u16,
    /// Period of the stage's background work
    pub interval: Duration,
    /// Base URL of the previous stage
    pub upstream: Option<String>,
    /// Records produced per generation
    pub buffer_size: usize,
    /// Where trained models are written
    pub model_dir: PathBuf,
    /// Retry shape of upstream calls
    pub retry: RetryPolicy,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            port: 8001,
            interval: Duration::from_secs(60),
            upstream: None,
            buffer_size: 1000,
            model_dir: PathBuf::from("modelos"),
            retry: RetryPolicy::default(),
        }
    }
}

impl StageOptions {
    pub(crate) fn upstream(&self) -> Result<&str> {
        self.upstream
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| StagehandError::MissingConfigField("upstream".to_string()))
    }
}

/// Bind `0.0.0.0:port` and serve until `shutdown` resolves
pub async fn serve<F>(router: Router, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Stage listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Check the upstream `/status`, then GET `path` from it
pub(crate) async fn fetch_upstream<T: DeserializeOwned>(
    poller: &HealthPoller,
    base_url: &str,
    path: &str,
) -> Result<T> {
    ensure_upstream_up(poller, base_url).await?;
    poller.get_json(&format!("{}{}", base_url, path)).await
}

pub(crate) async fn ensure_upstream_up(poller: &HealthPoller, base_url: &str) -> Result<()> {
    match poller.poll(&format!("{}/status", base_url)).await {
        HealthResult::Healthy(_) => Ok(()),
        HealthResult::Unreachable(e) => Err(e),
    }
}

/// 503 with a `detail` message, for data that is not produced yet
pub(crate) fn unavailable(detail: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "detail": detail })),
    )
        .into_response()
}

pub(crate) fn now_iso() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
