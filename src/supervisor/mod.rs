// Supervisor module - per-service workers and the shared status board

mod monitor;
mod status;
mod worker;

pub use monitor::{check_all, Supervision, Supervisor, SupervisorConfig};
pub use status::{Health, ServiceStatus, StatusBoard, StatusWriter};
