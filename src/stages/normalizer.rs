use crate::error::Result;
use crate::health::HealthPoller;
use crate::stages::{
    fetch_upstream, now_iso, serve, unavailable, StageOptions, STATUS_ACTIVE, STATUS_WAITING,
};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Columns standardized by the normalizer
pub const NUMERIC_COLUMNS: &[&str] = &["idade", "salario"];

pub type Row = Map<String, Value>;

#[derive(Debug, Default)]
pub struct NormalizerState {
    pub rows: Vec<Row>,
    pub last_normalization: Option<String>,
    pub normalizations: u64,
}

pub type SharedState = Arc<RwLock<NormalizerState>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct NormalizerStatus {
    pub status: String,
    #[serde(rename = "ultima_normalizacao")]
    pub last_normalization: String,
    #[serde(rename = "total_normalizacoes")]
    pub normalizations: u64,
    #[serde(rename = "registros_processados")]
    pub processed_records: usize,
}

/// Z-score the numeric columns in place (population standard deviation).
///
/// Returns the columns that are missing or non-numeric in some row; the rows
/// are left untouched in that case. A column with zero spread is only centred.
pub fn standardize(rows: &mut [Row]) -> std::result::Result<(), Vec<&'static str>> {
    let missing: Vec<&'static str> = NUMERIC_COLUMNS
        .iter()
        .copied()
        .filter(|col| {
            rows.is_empty()
                || rows
                    .iter()
                    .any(|row| row.get(*col).and_then(Value::as_f64).is_none())
        })
        .collect();

    if !missing.is_empty() {
        return Err(missing);
    }

    for col in NUMERIC_COLUMNS {
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(*col).and_then(Value::as_f64))
            .collect();

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        for (row, value) in rows.iter_mut().zip(values) {
            let scaled = if std_dev > 0.0 {
                (value - mean) / std_dev
            } else {
                value - mean
            };
            row.insert(col.to_string(), Value::from(scaled));
        }
    }

    Ok(())
}

/// Pull the generator's records and standardize them
pub async fn normalize_once(state: &SharedState, poller: &HealthPoller, upstream: &str) -> Result<()> {
    let normalization_id = Uuid::new_v4();
    tracing::info!(normalization_id = %normalization_id, "Collecting records to normalize");

    let mut rows: Vec<Row> = fetch_upstream(poller, upstream, "/dados").await?;

    if let Err(missing) = standardize(&mut rows) {
        tracing::warn!(
            normalization_id = %normalization_id,
            "Numeric columns missing, skipping batch: {:?}",
            missing
        );
        return Ok(());
    }

    let mut state = state.write().await;
    state.rows = rows;
    state.last_normalization = Some(now_iso());
    state.normalizations += 1;

    tracing::info!(
        normalization_id = %normalization_id,
        records = state.rows.len(),
        "Normalized records"
    );
    Ok(())
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/dados_normalizados", get(get_rows))
        .route("/status", get(get_status))
        .with_state(state)
}

async fn get_rows(State(state): State<SharedState>) -> Response {
    let state = state.read().await;
    if state.rows.is_empty() {
        return unavailable("Dados ainda não normalizados");
    }
    Json(state.rows.clone()).into_response()
}

async fn get_status(State(state): State<SharedState>) -> Json<NormalizerStatus> {
    let state = state.read().await;
    let status = if state.rows.is_empty() {
        STATUS_WAITING
    } else {
        STATUS_ACTIVE
    };

    Json(NormalizerStatus {
        status: status.to_string(),
        last_normalization: state.last_normalization.clone().unwrap_or_else(now_iso),
        normalizations: state.normalizations,
        processed_records: state.rows.len(),
    })
}

pub async fn run<F>(options: StageOptions, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let upstream = options.upstream()?.to_string();
    let poller = HealthPoller::new(options.retry.clone());
    let state = SharedState::default();

    let worker_state = Arc::clone(&state);
    let interval = options.interval;
    let worker = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = normalize_once(&worker_state, &poller, &upstream).await {
                tracing::error!("Failed to get records from generator: {}", e);
            }
        }
    });

    let result = serve(router(state), options.port, shutdown).await;
    worker.abort();
    result
}
