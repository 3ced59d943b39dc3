// Health module - bounded-retry status polling

mod poller;
pub mod retry;

pub use poller::{HealthPoller, HealthResult, StatusPayload, READY_STATUSES};
pub use retry::{retry, Backoff, RetryPolicy};
