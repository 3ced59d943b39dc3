use crate::error::Result;
use crate::health::HealthPoller;
use crate::process::{Launcher, RestartPolicy, ServiceHandle, ServiceSpec};
use crate::supervisor::status::{ServiceStatus, StatusBoard};
use crate::supervisor::worker::ServiceWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often each worker runs a cycle
    pub poll_interval: Duration,
    /// Restart rules for services whose process exits
    pub restart: RestartPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            restart: RestartPolicy::new(),
        }
    }
}

/// Runs one worker task per service and exposes their statuses
pub struct Supervisor {
    config: SupervisorConfig,
    poller: HealthPoller,
    launcher: Launcher,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, poller: HealthPoller, launcher: Launcher) -> Self {
        Self {
            config,
            poller,
            launcher,
        }
    }

    /// Take ownership of launched services and supervise them until `shutdown` is raised
    pub fn supervise(
        &self,
        handles: Vec<ServiceHandle>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Supervision> {
        let mut board = StatusBoard::new();
        let mut workers = Vec::with_capacity(handles.len());

        for handle in handles {
            let writer = board.register(&handle.spec)?;
            let worker = ServiceWorker::supervising(
                handle,
                writer,
                self.poller.clone(),
                self.launcher.clone(),
                self.config.restart.clone(),
            );
            workers.push(tokio::spawn(
                worker.run(self.config.poll_interval, shutdown.clone()),
            ));
        }

        info!(
            services = workers.len(),
            interval = ?self.config.poll_interval,
            "Supervisor started"
        );

        Ok(Supervision {
            board,
            workers,
            launcher: Some(self.launcher.clone()),
        })
    }

    /// Poll services run by someone else; nothing is started, stopped or restarted
    pub fn observe(
        &self,
        specs: &[Arc<ServiceSpec>],
        shutdown: watch::Receiver<bool>,
    ) -> Result<Supervision> {
        let mut board = StatusBoard::new();
        let mut workers = Vec::with_capacity(specs.len());

        for spec in specs {
            let writer = board.register(spec)?;
            let worker = ServiceWorker::observing(Arc::clone(spec), writer, self.poller.clone());
            workers.push(tokio::spawn(
                worker.run(self.config.poll_interval, shutdown.clone()),
            ));
        }

        info!(services = workers.len(), "Monitoring without supervision");

        Ok(Supervision {
            board,
            workers,
            launcher: None,
        })
    }
}

/// Running workers plus the board they write to
pub struct Supervision {
    board: StatusBoard,
    workers: Vec<JoinHandle<Option<ServiceHandle>>>,
    launcher: Option<Launcher>,
}

impl Supervision {
    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    /// Wait for every worker to observe shutdown, then stop owned services in
    /// reverse start order. Returns the final handles.
    pub async fn finish(self) -> Vec<ServiceHandle> {
        let mut handles = Vec::with_capacity(self.workers.len());

        for worker in self.workers {
            match worker.await {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        if let Some(launcher) = self.launcher {
            info!("Stopping {} service(s)", handles.len());
            launcher.stop_all(&mut handles).await;
        }

        handles
    }
}

/// Poll every service once, concurrently
pub async fn check_all(specs: &[Arc<ServiceSpec>], poller: &HealthPoller) -> Vec<ServiceStatus> {
    let mut board = StatusBoard::new();
    let mut tasks = Vec::with_capacity(specs.len());

    for spec in specs {
        let writer = match board.register(spec) {
            Ok(writer) => writer,
            Err(e) => {
                error!("Skipping service: {}", e);
                continue;
            }
        };
        let mut worker = ServiceWorker::observing(Arc::clone(spec), writer, poller.clone());
        tasks.push(tokio::spawn(async move { worker.cycle().await }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!("Status check task failed: {}", e);
        }
    }

    board.snapshot()
}
