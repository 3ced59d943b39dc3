use crate::error::{Result, StagehandError};
use crate::health::retry::{retry, RetryPolicy};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// `status` values that mean "ready to serve"
pub const READY_STATUSES: &[&str] = &["ativo", "active", "ok", "healthy", "ready"];

/// Decoded body of a service's status endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPayload {
    fields: Map<String, Value>,
}

impl StatusPayload {
    /// Accept only a JSON object carrying a string `status` field
    pub fn from_value(url: &str, value: Value) -> Result<Self> {
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(StagehandError::MalformedResponse {
                    url: url.to_string(),
                    reason: format!("expected a JSON object, got {}", json_kind(&other)),
                })
            }
        };

        match fields.get("status") {
            Some(Value::String(_)) => Ok(Self { fields }),
            Some(other) => Err(StagehandError::MalformedResponse {
                url: url.to_string(),
                reason: format!("'status' must be a string, got {}", json_kind(other)),
            }),
            None => Err(StagehandError::MalformedResponse {
                url: url.to_string(),
                reason: "missing 'status' field".to_string(),
            }),
        }
    }

    pub fn status(&self) -> &str {
        self.fields
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        let status = self.status();
        READY_STATUSES
            .iter()
            .any(|ready| ready.eq_ignore_ascii_case(status))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Outcome of one bounded-retry status check
#[derive(Debug)]
pub enum HealthResult {
    Healthy(StatusPayload),
    Unreachable(StagehandError),
}

impl HealthResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthResult::Healthy(_))
    }
}

/// HTTP client wrapping the pipeline's single retry shape.
///
/// Used for health polls by the supervisor and launcher, and for every
/// inter-stage data call made by the stage services.
#[derive(Debug, Clone)]
pub struct HealthPoller {
    client: Client,
    policy: RetryPolicy,
}

impl HealthPoller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_client(Client::new(), policy)
    }

    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Same client, different retry budget
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            client: self.client.clone(),
            policy,
        }
    }

    /// Poll a status endpoint: at most `max_attempts` GETs, stopping at the first success
    pub async fn poll(&self, url: &str) -> HealthResult {
        let result = retry(
            &self.policy,
            url,
            |_| self.fetch_status(url),
            || self.timeout_error(url),
        )
        .await;

        match result {
            Ok(payload) => HealthResult::Healthy(payload),
            Err(e) => HealthResult::Unreachable(e),
        }
    }

    /// GET a JSON document with the shared retry policy
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        retry(
            &self.policy,
            url,
            |_| async move {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| unreachable(url, e))?;
                Self::decode(url, response).await
            },
            || self.timeout_error(url),
        )
        .await
    }

    /// POST a JSON body and decode the JSON reply with the shared retry policy
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        retry(
            &self.policy,
            url,
            |_| async move {
                let response = self
                    .client
                    .post(url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| unreachable(url, e))?;
                Self::decode(url, response).await
            },
            || self.timeout_error(url),
        )
        .await
    }

    async fn fetch_status(&self, url: &str) -> Result<StatusPayload> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unreachable(url, e))?;
        let body: Value = Self::decode(url, response).await?;
        StatusPayload::from_value(url, body)
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(StagehandError::Unreachable {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StagehandError::MalformedResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    fn timeout_error(&self, url: &str) -> StagehandError {
        StagehandError::Unreachable {
            url: url.to_string(),
            reason: format!("no response within {:?}", self.policy.attempt_timeout),
        }
    }
}

fn unreachable(url: &str, error: reqwest::Error) -> StagehandError {
    StagehandError::Unreachable {
        url: url.to_string(),
        reason: error.to_string(),
    }
}
