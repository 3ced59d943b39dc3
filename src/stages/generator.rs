use crate::error::Result;
use crate::stages::{now_iso, serve, unavailable, StageOptions, STATUS_ACTIVE};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const FIRST_NAMES: &[&str] = &[
    "Ana", "Bruno", "Carla", "Diego", "Eduarda", "Felipe", "Gabriela", "Heitor", "Isabela",
    "João", "Larissa", "Marcos", "Natália", "Otávio", "Paula", "Rafael", "Sofia", "Thiago",
];
const LAST_NAMES: &[&str] = &[
    "Silva", "Santos", "Oliveira", "Souza", "Lima", "Pereira", "Costa", "Almeida", "Ribeiro",
    "Carvalho", "Gomes", "Martins",
];
const CITIES: &[&str] = &[
    "São Paulo", "Rio de Janeiro", "Belo Horizonte", "Salvador", "Curitiba", "Recife",
    "Porto Alegre", "Fortaleza", "Manaus", "Goiânia",
];
const JOBS: &[&str] = &[
    "Analista de Sistemas", "Engenheiro Civil", "Professor", "Enfermeiro", "Contador",
    "Designer", "Advogado", "Vendedor", "Médico", "Arquiteto",
];

/// One generated record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "idade")]
    pub age: u32,
    #[serde(rename = "salario")]
    pub salary: f64,
    #[serde(rename = "cidade")]
    pub city: String,
    #[serde(rename = "cargo")]
    pub job: String,
    pub timestamp: String,
    #[serde(rename = "geracao_id")]
    pub generation_id: String,
}

#[derive(Debug, Default)]
pub struct GeneratorState {
    pub records: Vec<Record>,
    pub last_generation: Option<String>,
    pub generations: u64,
}

pub type SharedState = Arc<RwLock<GeneratorState>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct GeneratorStatus {
    pub status: String,
    #[serde(rename = "ultima_geracao")]
    pub last_generation: String,
    #[serde(rename = "total_geracoes")]
    pub generations: u64,
    #[serde(rename = "registros_atuais")]
    pub current_records: usize,
}

/// Build `count` records sharing one generation id
pub fn generate_batch(count: usize) -> Vec<Record> {
    let mut rng = rand::thread_rng();
    let generation_id = Uuid::new_v4().to_string();

    (0..count)
        .map(|_| {
            let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("Ana");
            let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("Silva");
            let salary: f64 = rng.gen_range(1000.0..15000.0);

            Record {
                name: format!("{} {}", first, last),
                age: rng.gen_range(18..=80),
                salary: (salary * 100.0).round() / 100.0,
                city: CITIES.choose(&mut rng).copied().unwrap_or("São Paulo").to_string(),
                job: JOBS.choose(&mut rng).copied().unwrap_or("Professor").to_string(),
                timestamp: now_iso(),
                generation_id: generation_id.clone(),
            }
        })
        .collect()
}

/// Replace the buffer with a fresh batch
pub async fn generate_once(state: &SharedState, buffer_size: usize) {
    let batch = generate_batch(buffer_size);
    let generation_id = batch
        .first()
        .map(|r| r.generation_id.clone())
        .unwrap_or_default();

    let mut state = state.write().await;
    state.records = batch;
    state.last_generation = Some(now_iso());
    state.generations += 1;

    tracing::info!(
        generation_id = %generation_id,
        records = state.records.len(),
        total_generations = state.generations,
        "Generated new records"
    );
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/dados", get(get_records))
        .route("/status", get(get_status))
        .with_state(state)
}

async fn get_records(State(state): State<SharedState>) -> Response {
    let state = state.read().await;
    if state.records.is_empty() {
        return unavailable("Dados ainda não gerados");
    }
    Json(state.records.clone()).into_response()
}

async fn get_status(State(state): State<SharedState>) -> Json<GeneratorStatus> {
    let state = state.read().await;
    Json(GeneratorStatus {
        status: STATUS_ACTIVE.to_string(),
        last_generation: state.last_generation.clone().unwrap_or_else(now_iso),
        generations: state.generations,
        current_records: state.records.len(),
    })
}

pub async fn run<F>(options: StageOptions, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = SharedState::default();

    let worker_state = Arc::clone(&state);
    let interval = options.interval;
    let buffer_size = options.buffer_size;
    let worker = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            generate_once(&worker_state, buffer_size).await;
        }
    });

    let result = serve(router(state), options.port, shutdown).await;
    worker.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_shape() {
        let batch = generate_batch(50);
        assert_eq!(batch.len(), 50);

        let id = &batch[0].generation_id;
        for record in &batch {
            assert!((18..=80).contains(&record.age));
            assert!(record.salary >= 1000.0 && record.salary <= 15000.0);
            assert_eq!(&record.generation_id, id);
        }
    }

    #[test]
    fn test_record_wire_names() {
        let record = generate_batch(1).remove(0);
        let value = serde_json::to_value(&record).unwrap();

        for key in ["nome", "idade", "salario", "cidade", "cargo", "timestamp", "geracao_id"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_generate_once_updates_state() {
        let state = SharedState::default();
        generate_once(&state, 10).await;
        generate_once(&state, 10).await;

        let state = state.read().await;
        assert_eq!(state.records.len(), 10);
        assert_eq!(state.generations, 2);
        assert!(state.last_generation.is_some());
    }
}
