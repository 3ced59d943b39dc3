use crate::error::{Result, StagehandError};
use crate::health::{HealthPoller, HealthResult, RetryPolicy};
use crate::logs::capture_output;
use crate::process::port_check;
use crate::process::spawner::spawn_service;
use crate::process::types::{ServiceHandle, ServiceSpec, ServiceState};
use crate::shutdown::wait_for_shutdown;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Timing knobs shared by every launch
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Pause after spawning before checking the process is still alive
    pub settle_window: Duration,
    /// Pause between two consecutive starts in `launch_all`
    pub start_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL
    pub stop_timeout: Duration,
    /// Budget for the readiness handshake against the service's own status endpoint
    pub readiness: RetryPolicy,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            settle_window: Duration::from_secs(1),
            start_interval: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            readiness: RetryPolicy::default(),
        }
    }
}

/// Starts and stops service processes
#[derive(Debug, Clone)]
pub struct Launcher {
    config: LaunchConfig,
    poller: HealthPoller,
    log_dir: Option<PathBuf>,
}

impl Launcher {
    pub fn new(config: LaunchConfig) -> Self {
        let poller = HealthPoller::new(config.readiness.clone());
        Self {
            config,
            poller,
            log_dir: None,
        }
    }

    /// Capture child output into files under `log_dir`
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    /// Start one service.
    ///
    /// Waits out port conflicts (`max_retries + 1` checks, `retry_delay` apart),
    /// spawns the process, checks it survives the settle window and, when
    /// `wait_ready` is set, waits for its status endpoint to answer.
    /// No process is left running when an error is returned.
    pub async fn start(&self, spec: Arc<ServiceSpec>) -> Result<ServiceHandle> {
        let (_never, mut shutdown) = watch::channel(false);
        self.start_until(spec, &mut shutdown).await
    }

    /// [`Launcher::start`] that gives up waiting once `shutdown` is raised.
    ///
    /// Before the spawn this fails with `Cancelled`. After it, the settle window
    /// and readiness handshake are cut short and the handle is returned so the
    /// caller can stop the process gracefully.
    pub async fn start_until(
        &self,
        spec: Arc<ServiceSpec>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ServiceHandle> {
        if spec.check_port {
            self.wait_for_free_port(&spec, shutdown).await?;
        }
        if *shutdown.borrow() {
            return Err(StagehandError::Cancelled(spec.name.clone()));
        }

        let spawned = spawn_service(&spec)?;
        let mut child = spawned.child;
        capture_output(&spec.name, &mut child, self.log_dir.as_deref());

        tracing::info!(
            service = %spec.name,
            pid = spawned.pid,
            port = spec.port,
            "Spawned service process"
        );

        let mut handle = ServiceHandle::starting(Arc::clone(&spec), child, spawned.pid);

        tokio::select! {
            _ = sleep(self.config.settle_window) => {}
            _ = wait_for_shutdown(shutdown) => {
                tracing::info!(service = %spec.name, "Shutdown requested during start");
                return Ok(handle);
            }
        }
        if handle.has_exited() {
            return Err(immediate_exit(&handle));
        }

        if spec.wait_ready {
            self.wait_until_ready(&mut handle, shutdown).await?;
        }

        handle.mark_running();
        Ok(handle)
    }

    async fn wait_for_free_port(
        &self,
        spec: &ServiceSpec,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let total_checks = spec.max_retries.saturating_add(1);

        for check in 1..=total_checks {
            if !port_check::is_bound(spec.port).await {
                return Ok(());
            }

            tracing::warn!(
                service = %spec.name,
                port = spec.port,
                attempt = check,
                max_attempts = total_checks,
                "Port already in use"
            );

            if check < total_checks {
                tokio::select! {
                    _ = sleep(spec.retry_delay) => {}
                    _ = wait_for_shutdown(shutdown) => {
                        return Err(StagehandError::Cancelled(spec.name.clone()));
                    }
                }
            }
        }

        Err(StagehandError::PortConflict {
            service: spec.name.clone(),
            port: spec.port,
            attempts: total_checks,
        })
    }

    /// Poll the service's own status endpoint until it answers.
    ///
    /// An exit during the handshake fails the start; an exhausted budget or a
    /// shutdown only ends the wait, the supervisor keeps reporting the service
    /// until it answers.
    async fn wait_until_ready(
        &self,
        handle: &mut ServiceHandle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let policy = &self.config.readiness;
        let single_shot = self.poller.with_policy(RetryPolicy {
            max_attempts: 1,
            ..policy.clone()
        });
        let url = handle.spec.status_url();
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                result = single_shot.poll(&url) => result,
                _ = wait_for_shutdown(shutdown) => return Ok(()),
            };

            match result {
                HealthResult::Healthy(payload) => {
                    tracing::info!(
                        service = %handle.name(),
                        status = payload.status(),
                        attempt,
                        "Service answered readiness check"
                    );
                    return Ok(());
                }
                HealthResult::Unreachable(e) => {
                    if handle.has_exited() {
                        return Err(immediate_exit(handle));
                    }
                    tracing::debug!(
                        service = %handle.name(),
                        attempt,
                        error = %e,
                        "Service not ready yet"
                    );
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = sleep(policy.backoff.delay_after(policy.delay, attempt)) => {}
                    _ = wait_for_shutdown(shutdown) => return Ok(()),
                }
                if handle.has_exited() {
                    return Err(immediate_exit(handle));
                }
            }
        }

        tracing::warn!(
            service = %handle.name(),
            url = %url,
            "Service did not answer readiness checks, continuing"
        );
        Ok(())
    }

    /// Stop a service: SIGTERM, wait up to `stop_timeout`, then SIGKILL.
    ///
    /// Idempotent: a handle whose process is already gone receives no signal.
    /// The handle is always left `Exited`.
    pub async fn stop(&self, handle: &mut ServiceHandle) -> Result<()> {
        if handle.has_exited() {
            handle.mark_exited();
            return Ok(());
        }

        let name = handle.name().to_string();
        let timeout = self.config.stop_timeout;

        let Some(pid) = handle.pid else {
            handle.mark_exited();
            return Ok(());
        };

        tracing::info!(service = %name, pid, "Gracefully stopping service with SIGTERM");
        send_terminate(&name, pid)?;
        handle.signals_sent += 1;

        if let Some(child) = handle.child.as_mut() {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(service = %name, "Service exited with status: {}", status);
                    handle.exit_status = Some(status);
                }
                Ok(Err(e)) => {
                    handle.state = ServiceState::Exited;
                    return Err(StagehandError::StopError(name, format!("Wait failed: {}", e)));
                }
                Err(_) => {
                    tracing::warn!(
                        service = %name,
                        "Service did not exit within {:?}, sending SIGKILL",
                        timeout
                    );
                    handle.signals_sent += 1;
                    if let Err(e) = child.kill().await {
                        tracing::warn!(service = %name, "Force kill failed: {}", e);
                    }
                    if let Ok(Some(status)) = child.try_wait() {
                        handle.exit_status = Some(status);
                    }
                }
            }
        }

        handle.mark_exited();
        Ok(())
    }

    /// Start every service in declared order, `start_interval` apart.
    ///
    /// Only a failure of the first service aborts the launch; later failures
    /// leave a `FailedToStart` handle that the supervisor retries. Once
    /// `shutdown` is raised no further service is started and the handles
    /// started so far are returned, for the caller to stop.
    pub async fn launch_all(
        &self,
        specs: &[Arc<ServiceSpec>],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<ServiceHandle>> {
        let mut handles = Vec::with_capacity(specs.len());

        for (index, spec) in specs.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = sleep(self.config.start_interval) => {}
                    _ = wait_for_shutdown(shutdown) => break,
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match self.start_until(Arc::clone(spec), shutdown).await {
                Ok(handle) => {
                    tracing::info!(service = %spec.name, port = spec.port, "Service started");
                    handles.push(handle);
                }
                Err(StagehandError::Cancelled(_)) => break,
                Err(e) if index == 0 => {
                    tracing::error!(service = %spec.name, "First service failed to start: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(service = %spec.name, "Service failed to start: {}", e);
                    handles.push(ServiceHandle::failed(Arc::clone(spec)));
                }
            }
        }

        if *shutdown.borrow() {
            tracing::info!(
                started = handles.len(),
                total = specs.len(),
                "Launch interrupted by shutdown"
            );
        }

        Ok(handles)
    }

    /// Stop handles in reverse start order; failures are logged and skipped
    pub async fn stop_all(&self, handles: &mut [ServiceHandle]) {
        for handle in handles.iter_mut().rev() {
            if let Err(e) = self.stop(handle).await {
                tracing::error!(service = %handle.name(), "Failed to stop service: {}", e);
            }
        }
    }
}

fn immediate_exit(handle: &ServiceHandle) -> StagehandError {
    let status = handle
        .exit_status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| ServiceState::Exited.to_string());
    StagehandError::ImmediateExit {
        service: handle.name().to_string(),
        status,
    }
}

#[cfg(unix)]
fn send_terminate(name: &str, pid: u32) -> Result<()> {
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // Process vanished between the liveness check and the signal
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(StagehandError::SignalError(format!(
            "Failed to send SIGTERM to {} (PID {}): {}",
            name, pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn send_terminate(_name: &str, _pid: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> LaunchConfig {
        LaunchConfig {
            settle_window: Duration::from_millis(200),
            start_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(2),
            readiness: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(200)),
        }
    }

    fn sleeper(name: &str) -> Arc<ServiceSpec> {
        Arc::new(
            ServiceSpec::new(name, "/bin/sleep", 0)
                .with_args(["30"])
                .without_readiness(),
        )
    }

    fn no_port_check(spec: ServiceSpec) -> Arc<ServiceSpec> {
        let mut spec = spec;
        spec.check_port = false;
        Arc::new(spec)
    }

    #[tokio::test]
    async fn test_start_returns_running_handle() {
        let launcher = Launcher::new(quick_config());
        let spec = no_port_check((*sleeper("sleeper")).clone());

        let mut handle = launcher.start(spec).await.unwrap();
        assert_eq!(handle.state, ServiceState::Running);
        assert!(handle.pid.is_some());

        launcher.stop(&mut handle).await.unwrap();
        assert_eq!(handle.state, ServiceState::Exited);
    }

    #[tokio::test]
    async fn test_immediate_exit_detected() {
        let launcher = Launcher::new(quick_config());
        let spec = no_port_check(ServiceSpec::new("quitter", "/bin/true", 0).without_readiness());

        match launcher.start(spec).await {
            Err(StagehandError::ImmediateExit { service, .. }) => assert_eq!(service, "quitter"),
            other => panic!("Expected ImmediateExit, got {:?}", other.map(|h| h.state)),
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let launcher = Launcher::new(quick_config());
        let spec = no_port_check((*sleeper("sleeper")).clone());

        let mut handle = launcher.start(spec).await.unwrap();
        launcher.stop(&mut handle).await.unwrap();
        let signals = handle.signals_sent();
        assert_eq!(signals, 1);

        launcher.stop(&mut handle).await.unwrap();
        assert_eq!(handle.signals_sent(), signals);
        assert_eq!(handle.state, ServiceState::Exited);
    }

    #[tokio::test]
    async fn test_stop_failed_handle_is_noop() {
        let launcher = Launcher::new(quick_config());
        let mut handle = ServiceHandle::failed(sleeper("never-started"));

        launcher.stop(&mut handle).await.unwrap();
        assert_eq!(handle.signals_sent(), 0);
        assert_eq!(handle.state, ServiceState::Exited);
    }

    #[tokio::test]
    async fn test_launch_all_aborts_on_first_failure() {
        let launcher = Launcher::new(quick_config());
        let specs = vec![
            no_port_check(ServiceSpec::new("broken", "/nonexistent/binary", 0).without_readiness()),
            no_port_check((*sleeper("second")).clone()),
        ];

        let (_tx, mut shutdown) = watch::channel(false);
        assert!(launcher.launch_all(&specs, &mut shutdown).await.is_err());
    }

    #[tokio::test]
    async fn test_launch_all_keeps_going_after_later_failure() {
        let launcher = Launcher::new(quick_config());
        let specs = vec![
            no_port_check((*sleeper("first")).clone()),
            no_port_check(ServiceSpec::new("broken", "/nonexistent/binary", 0).without_readiness()),
        ];

        let (_tx, mut shutdown) = watch::channel(false);
        let mut handles = launcher.launch_all(&specs, &mut shutdown).await.unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].state, ServiceState::Running);
        assert_eq!(handles[1].state, ServiceState::FailedToStart);

        launcher.stop_all(&mut handles).await;
        assert!(handles.iter().all(|h| h.state == ServiceState::Exited));
    }

    #[tokio::test]
    async fn test_launch_all_starts_nothing_after_shutdown() {
        let launcher = Launcher::new(quick_config());
        let specs = vec![no_port_check((*sleeper("first")).clone())];
        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        let handles = launcher.launch_all(&specs, &mut shutdown).await.unwrap();
        assert!(handles.is_empty());
    }

    #[tokio::test]
    async fn test_start_until_cancelled_during_port_wait() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let spec = Arc::new(
            ServiceSpec::new("squatted", "/bin/sleep", port)
                .with_args(["30"])
                .with_retries(50, Duration::from_millis(200))
                .without_readiness(),
        );

        let launcher = Launcher::new(quick_config());
        let (tx, mut shutdown) = watch::channel(false);
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            let _ = tx.send(true);
        });

        match launcher.start_until(spec, &mut shutdown).await {
            Err(StagehandError::Cancelled(service)) => assert_eq!(service, "squatted"),
            other => panic!("Expected Cancelled, got {:?}", other.map(|h| h.state)),
        }
        drop(listener);
    }
}
