use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;

/// Host every supervised service is reached on
pub const SERVICE_HOST: &str = "127.0.0.1";

/// Immutable descriptor of a supervised service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    /// Unique service name
    pub name: String,
    /// Executable to run
    pub command: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Port the service listens on, unique across specs
    pub port: u16,
    /// Extra port-conflict checks after the first one
    pub max_retries: u32,
    /// Pause between port-conflict checks
    pub retry_delay: Duration,
    /// Path of the status endpoint
    pub health_path: String,
    /// Poll the status endpoint after spawning before handing the service over
    pub wait_ready: bool,
    /// Refuse to start while something else answers on the port
    pub check_port: bool,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            port,
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            health_path: "/status".to_string(),
            wait_ready: true,
            check_port: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn without_readiness(mut self) -> Self {
        self.wait_ready = false;
        self
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", SERVICE_HOST, self.port)
    }

    pub fn status_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health_path)
    }
}

/// Lifecycle of a launched service process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Starting,
    Running,
    Exited,
    FailedToStart,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Exited => write!(f, "exited"),
            ServiceState::FailedToStart => write!(f, "failed to start"),
        }
    }
}

/// A launched service, owned by exactly one task at a time
#[derive(Debug)]
pub struct ServiceHandle {
    pub spec: Arc<ServiceSpec>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Local>>,
    pub state: ServiceState,
    pub(crate) child: Option<Child>,
    pub(crate) exit_status: Option<ExitStatus>,
    pub(crate) signals_sent: usize,
}

impl ServiceHandle {
    pub(crate) fn starting(spec: Arc<ServiceSpec>, child: Child, pid: u32) -> Self {
        Self {
            spec,
            pid: Some(pid),
            started_at: Some(Local::now()),
            state: ServiceState::Starting,
            child: Some(child),
            exit_status: None,
            signals_sent: 0,
        }
    }

    /// Placeholder for a service whose launch failed; the supervisor retries it
    pub fn failed(spec: Arc<ServiceSpec>) -> Self {
        Self {
            spec,
            pid: None,
            started_at: None,
            state: ServiceState::FailedToStart,
            child: None,
            exit_status: None,
            signals_sent: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn mark_running(&mut self) {
        self.state = ServiceState::Running;
    }

    pub fn mark_exited(&mut self) {
        self.state = ServiceState::Exited;
    }

    /// Non-blocking liveness check; records the exit status once the process is gone
    pub fn has_exited(&mut self) -> bool {
        if matches!(self.state, ServiceState::Exited | ServiceState::FailedToStart) {
            return true;
        }

        let Some(child) = self.child.as_mut() else {
            self.state = ServiceState::Exited;
            return true;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                self.state = ServiceState::Exited;
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(service = %self.spec.name, "Failed to query process status: {}", e);
                false
            }
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Number of termination signals delivered to this handle's process
    pub fn signals_sent(&self) -> usize {
        self.signals_sent
    }

    pub fn uptime(&self) -> Option<chrono::Duration> {
        match self.state {
            ServiceState::Running | ServiceState::Starting => {
                self.started_at.map(|started| Local::now() - started)
            }
            _ => None,
        }
    }
}
