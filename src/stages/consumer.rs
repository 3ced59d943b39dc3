use crate::error::Result;
use crate::health::HealthPoller;
use crate::stages::trainer::{PredictRequest, PredictResponse};
use crate::stages::{ensure_upstream_up, now_iso, serve, StageOptions, STATUS_ACTIVE};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ConsumerState {
    pub last_prediction: Option<f64>,
    pub consumed: u64,
    pub last_attempt: Option<String>,
    pub errors: u64,
}

pub type SharedState = Arc<RwLock<ConsumerState>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumerStatus {
    pub status: String,
    #[serde(rename = "ultima_predicao")]
    pub last_prediction: Option<f64>,
    #[serde(rename = "total_consumos")]
    pub consumed: u64,
    #[serde(rename = "ultima_tentativa")]
    pub last_attempt: String,
    #[serde(rename = "erros")]
    pub errors: u64,
}

/// Ask the trainer for one prediction with a random age
pub async fn consume_once(state: &SharedState, poller: &HealthPoller, upstream: &str) -> Result<f64> {
    let consumption_id = Uuid::new_v4();
    let age: i64 = rand::thread_rng().gen_range(18..=80);
    state.write().await.last_attempt = Some(now_iso());

    tracing::info!(consumption_id = %consumption_id, age, "Requesting prediction");

    let outcome = async {
        ensure_upstream_up(poller, upstream).await?;
        poller
            .post_json::<_, PredictResponse>(
                &format!("{}/predict", upstream),
                &PredictRequest { age },
            )
            .await
    }
    .await;

    let mut state = state.write().await;
    match outcome {
        Ok(response) => {
            state.last_prediction = Some(response.prediction);
            state.consumed += 1;
            tracing::info!(
                consumption_id = %consumption_id,
                age,
                prediction = response.prediction,
                "Prediction received"
            );
            Ok(response.prediction)
        }
        Err(e) => {
            state.errors += 1;
            Err(e)
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(state)
}

async fn get_status(State(state): State<SharedState>) -> Json<ConsumerStatus> {
    let state = state.read().await;
    Json(ConsumerStatus {
        status: STATUS_ACTIVE.to_string(),
        last_prediction: state.last_prediction,
        consumed: state.consumed,
        last_attempt: state.last_attempt.clone().unwrap_or_else(now_iso),
        errors: state.errors,
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
            if let Err(e) = consume_once(&worker_state, &poller, &upstream).await {
                tracing::error!("Failed to consume model: {}", e);
            }
        }
    });

    let result = serve(router(state), options.port, shutdown).await;
    worker.abort();
    result
}
