// Process module - launching, stopping and restarting service processes

mod launcher;
pub mod port_check;
pub mod restart;
pub mod spawner;
mod types;

pub use launcher::{LaunchConfig, Launcher};
pub use restart::{RestartPolicy, RestartTracker};
pub use types::{ServiceHandle, ServiceSpec, ServiceState, SERVICE_HOST};
