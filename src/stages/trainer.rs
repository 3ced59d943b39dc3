use crate::error::{Result, StagehandError};
use crate::health::HealthPoller;
use crate::stages::{
    fetch_upstream, now_iso, serve, unavailable, StageOptions, STATUS_ACTIVE, STATUS_WAITING,
};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Training row; other fields of the normalized records are ignored
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Sample {
    #[serde(rename = "idade")]
    pub age: f64,
    #[serde(rename = "salario")]
    pub salary: f64,
}

/// Least-squares line `salario = slope * idade + intercept`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub slope: f64,
    pub intercept: f64,
    pub samples: usize,
    /// `YYYYmmdd_HHMMSS` of the training run
    pub trained_at: String,
}

impl LinearModel {
    /// Fit by ordinary least squares; `None` without samples.
    /// A constant `idade` column yields a flat line through the mean salary.
    pub fn fit(samples: &[Sample], trained_at: impl Into<String>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let mean_x = samples.iter().map(|s| s.age).sum::<f64>() / n;
        let mean_y = samples.iter().map(|s| s.salary).sum::<f64>() / n;

        let (cov, var) = samples.iter().fold((0.0, 0.0), |(cov, var), s| {
            let dx = s.age - mean_x;
            (cov + dx * (s.salary - mean_y), var + dx * dx)
        });

        let slope = if var > 0.0 { cov / var } else { 0.0 };

        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
            samples: samples.len(),
            trained_at: trained_at.into(),
        })
    }

    pub fn predict(&self, age: f64) -> f64 {
        self.slope * age + self.intercept
    }

    /// Write as `modelo_<trained_at>.json` under `dir`
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("modelo_{}.json", self.trained_at));
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| StagehandError::Other(format!("Failed to encode model: {}", e)))?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

#[derive(Debug, Default)]
pub struct TrainerState {
    pub model: Option<LinearModel>,
    pub last_update: Option<String>,
    pub trainings: u64,
    pub predictions: u64,
}

pub type SharedState = Arc<RwLock<TrainerState>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(rename = "idade")]
    pub age: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    #[serde(rename = "predicao")]
    pub prediction: f64,
    pub timestamp: String,
    #[serde(rename = "modelo_timestamp")]
    pub model_timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainerStatus {
    pub status: String,
    #[serde(rename = "ultima_atualizacao")]
    pub last_update: String,
    #[serde(rename = "total_treinos")]
    pub trainings: u64,
    #[serde(rename = "total_predicoes")]
    pub predictions: u64,
}

/// Fetch normalized records, fit, persist and swap in a new model
pub async fn train_once(
    state: &SharedState,
    poller: &HealthPoller,
    upstream: &str,
    model_dir: &Path,
) -> Result<()> {
    let training_id = Uuid::new_v4();
    tracing::info!(training_id = %training_id, "Starting model training");

    let samples: Vec<Sample> = fetch_upstream(poller, upstream, "/dados_normalizados").await?;

    let trained_at = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let Some(model) = LinearModel::fit(&samples, trained_at.clone()) else {
        tracing::warn!(training_id = %training_id, "No samples received, skipping training");
        return Ok(());
    };

    let path = model.save(model_dir).await?;

    let mut state = state.write().await;
    state.model = Some(model);
    state.last_update = Some(trained_at);
    state.trainings += 1;

    tracing::info!(
        training_id = %training_id,
        path = %path.display(),
        samples = samples.len(),
        "Model trained and saved"
    );
    Ok(())
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/status", get(get_status))
        .with_state(state)
}

async fn predict(State(state): State<SharedState>, Json(request): Json<PredictRequest>) -> Response {
    let mut state = state.write().await;

    let Some(model) = state.model.as_ref() else {
        return unavailable("Modelo ainda não treinado");
    };

    let response = PredictResponse {
        prediction: model.predict(request.age as f64),
        timestamp: now_iso(),
        model_timestamp: model.trained_at.clone(),
    };
    state.predictions += 1;

    Json(response).into_response()
}

async fn get_status(State(state): State<SharedState>) -> Json<TrainerStatus> {
    let state = state.read().await;
    let status = if state.model.is_some() {
        STATUS_ACTIVE
    } else {
        STATUS_WAITING
    };

    Json(TrainerStatus {
        status: status.to_string(),
        last_update: state.last_update.clone().unwrap_or_else(now_iso),
        trainings: state.trainings,
        predictions: state.predictions,
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
    let model_dir = options.model_dir.clone();
    let worker = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = train_once(&worker_state, &poller, &upstream, &model_dir).await {
                tracing::error!("Training failed: {}", e);
            }
        }
    });

    let result = serve(router(state), options.port, shutdown).await;
    worker.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn samples(points: &[(f64, f64)]) -> Vec<Sample> {
        points
            .iter()
            .map(|&(age, salary)| Sample { age, salary })
            .collect()
    }

    #[test]
    fn test_fit_exact_line() {
        let model = LinearModel::fit(&samples(&[(1.0, 3.0), (2.0, 5.0), (3.0, 7.0)]), "t").unwrap();

        assert!((model.slope - 2.0).abs() < 1e-9);
        assert!((model.intercept - 1.0).abs() < 1e-9);
        assert!((model.predict(10.0) - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_constant_age() {
        let model = LinearModel::fit(&samples(&[(5.0, 10.0), (5.0, 20.0)]), "t").unwrap();
        assert_eq!(model.slope, 0.0);
        assert_eq!(model.predict(99.0), 15.0);
    }

    #[test]
    fn test_fit_empty() {
        assert!(LinearModel::fit(&[], "t").is_none());
    }

    #[tokio::test]
    async fn test_save_model() {
        let dir = TempDir::new().unwrap();
        let model = LinearModel::fit(&samples(&[(1.0, 1.0), (2.0, 2.0)]), "20240101_120000").unwrap();

        let path = model.save(dir.path()).await.unwrap();
        assert!(path.ends_with("modelo_20240101_120000.json"));

        let stored: LinearModel = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, model);
    }

    #[tokio::test]
    async fn test_predict_requires_model() {
        let state = SharedState::default();
        let response = predict(State(Arc::clone(&state)), Json(PredictRequest { age: 30 })).await;
        assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);

        state.write().await.model = LinearModel::fit(&samples(&[(0.0, 1.0), (1.0, 2.0)]), "t");
        let response = predict(State(Arc::clone(&state)), Json(PredictRequest { age: 2 })).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert_eq!(state.read().await.predictions, 1);
    }
}
