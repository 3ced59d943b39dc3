use crate::health::{HealthPoller, HealthResult};
use crate::process::{Launcher, RestartPolicy, RestartTracker, ServiceHandle, ServiceSpec};
use crate::shutdown::wait_for_shutdown;
use crate::supervisor::status::{Health, StatusWriter};
use chrono::Local;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// The one task responsible for a single service.
///
/// Owns the service's handle (absent in observe-only mode) and the only
/// writer of its status entry.
pub(crate) struct ServiceWorker {
    spec: Arc<ServiceSpec>,
    handle: Option<ServiceHandle>,
    writer: StatusWriter,
    poller: HealthPoller,
    launcher: Option<Launcher>,
    restart_policy: RestartPolicy,
    tracker: RestartTracker,
    given_up: bool,
}

impl ServiceWorker {
    /// Worker that restarts the service when its process exits
    pub(crate) fn supervising(
        handle: ServiceHandle,
        writer: StatusWriter,
        poller: HealthPoller,
        launcher: Launcher,
        restart_policy: RestartPolicy,
    ) -> Self {
        let pid = handle.pid;
        writer.update(|s| s.pid = pid);

        Self {
            spec: Arc::clone(&handle.spec),
            handle: Some(handle),
            writer,
            poller,
            launcher: Some(launcher),
            restart_policy,
            tracker: RestartTracker::new(),
            given_up: false,
        }
    }

    /// Worker that only polls a service someone else runs
    pub(crate) fn observing(spec: Arc<ServiceSpec>, writer: StatusWriter, poller: HealthPoller) -> Self {
        Self {
            spec,
            handle: None,
            writer,
            poller,
            launcher: None,
            restart_policy: RestartPolicy::new(),
            tracker: RestartTracker::new(),
            given_up: false,
        }
    }

    /// Cycle every `period` until shutdown; returns the handle it owns
    pub(crate) async fn run(
        mut self,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<ServiceHandle> {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = self.cycle() => {}
            }
        }

        debug!(service = %self.spec.name, "Worker stopped");
        self.handle
    }

    /// One supervision cycle: liveness first, then the health poll
    pub(crate) async fn cycle(&mut self) {
        if self.given_up {
            return;
        }

        if let Some(handle) = self.handle.as_mut() {
            if handle.has_exited() {
                self.handle_exit().await;
                return;
            }
        }

        let result = self.poller.poll(&self.spec.status_url()).await;
        self.record(result);
    }

    async fn handle_exit(&mut self) {
        let exit = self
            .handle
            .as_ref()
            .and_then(|h| h.exit_status())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "not running".to_string());

        let previous = self.writer.current().health;
        if previous != Health::Offline {
            warn!(service = %self.spec.name, exit = %exit, "Service process is down");
        }
        self.writer.update(|s| {
            s.health = Health::Offline;
            s.last_checked_at = Some(Local::now());
            s.metrics.clear();
            s.pid = None;
            s.detail = Some(format!("process {}", exit));
        });

        if !self.restart_policy.should_restart(&self.tracker) {
            self.give_up();
            return;
        }

        if !self.restart_policy.is_due(&self.tracker, Instant::now()) {
            return;
        }

        let Some(launcher) = self.launcher.as_ref() else {
            return;
        };

        self.tracker.record_attempt();
        let restarts = self.tracker.total();
        info!(
            service = %self.spec.name,
            attempt = self.tracker.consecutive(),
            total_restarts = restarts,
            "Restarting service"
        );

        match launcher.start(Arc::clone(&self.spec)).await {
            Ok(handle) => {
                let pid = handle.pid;
                info!(service = %self.spec.name, pid = ?pid, "Service restarted");
                self.handle = Some(handle);
                self.writer.update(|s| {
                    s.restarts = restarts;
                    s.pid = pid;
                    s.detail = Some("restarted".to_string());
                });
            }
            Err(e) => {
                error!(service = %self.spec.name, "Restart failed: {}", e);
                self.writer.update(|s| {
                    s.restarts = restarts;
                    s.detail = Some(e.to_string());
                });
            }
        }
    }

    fn give_up(&mut self) {
        self.given_up = true;
        let consecutive = self.tracker.consecutive();
        error!(
            service = %self.spec.name,
            consecutive_restarts = consecutive,
            "Restart limit reached, service marked failed"
        );
        self.writer.update(|s| {
            s.health = Health::Failed;
            s.detail = Some(format!(
                "gave up after {} consecutive restart(s)",
                consecutive
            ));
        });
    }

    fn record(&mut self, result: HealthResult) {
        let previous = self.writer.current().health;

        match result {
            HealthResult::Healthy(payload) => {
                self.tracker.record_recovery();

                let (health, detail) = if payload.is_ready() {
                    (Health::Online, None)
                } else {
                    (Health::Degraded, Some(payload.status().to_string()))
                };
                let mut metrics = payload.into_fields();
                metrics.remove("status");

                if previous != health {
                    info!(service = %self.spec.name, health = %health, "Health changed");
                }
                self.writer.update(|s| {
                    s.health = health;
                    s.last_checked_at = Some(Local::now());
                    s.metrics = metrics;
                    s.detail = detail;
                });
            }
            HealthResult::Unreachable(e) => {
                if e.is_malformed() {
                    warn!(service = %self.spec.name, "Health poll failed: {}", e);
                } else {
                    error!(service = %self.spec.name, "Health poll failed: {}", e);
                }
                self.writer.update(|s| {
                    s.health = Health::Offline;
                    s.last_checked_at = Some(Local::now());
                    s.metrics.clear();
                    s.detail = Some(e.to_string());
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::RetryPolicy;
    use crate::process::LaunchConfig;
    use crate::supervisor::status::StatusBoard;

    fn quick_poller() -> HealthPoller {
        HealthPoller::new(RetryPolicy::new(
            1,
            Duration::from_millis(10),
            Duration::from_millis(200),
        ))
    }

    fn quick_launcher() -> Launcher {
        Launcher::new(LaunchConfig {
            settle_window: Duration::from_millis(100),
            start_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(1),
            readiness: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(100)),
        })
    }

    fn dead_spec() -> Arc<ServiceSpec> {
        let mut spec = ServiceSpec::new("flaky", "/bin/sh", 1)
            .with_args(["-c", "exit 3"])
            .without_readiness();
        spec.check_port = false;
        Arc::new(spec)
    }

    #[tokio::test]
    async fn test_unreachable_poll_marks_offline() {
        let mut board = StatusBoard::new();
        // Port 1 on loopback is never served in test environments
        let spec = Arc::new(ServiceSpec::new("ghost", "/bin/true", 1));
        let writer = board.register(&spec).unwrap();

        let mut worker = ServiceWorker::observing(spec, writer, quick_poller());
        worker.cycle().await;

        let status = board.get("ghost").unwrap();
        assert_eq!(status.health, Health::Offline);
        assert!(status.last_checked_at.is_some());
        assert!(status.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_exit_triggers_single_restart_per_cycle() {
        let mut board = StatusBoard::new();
        let spec = dead_spec();
        let writer = board.register(&spec).unwrap();

        let mut worker = ServiceWorker::supervising(
            ServiceHandle::failed(Arc::clone(&spec)),
            writer,
            quick_poller(),
            quick_launcher(),
            RestartPolicy::new(),
        );

        worker.cycle().await;
        assert_eq!(board.get("flaky").unwrap().health, Health::Offline);
        assert_eq!(worker.tracker.total(), 1);

        worker.cycle().await;
        assert_eq!(worker.tracker.total(), 2);
        assert_eq!(board.get("flaky").unwrap().restarts, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_limit() {
        let mut board = StatusBoard::new();
        let spec = dead_spec();
        let writer = board.register(&spec).unwrap();

        let mut worker = ServiceWorker::supervising(
            ServiceHandle::failed(Arc::clone(&spec)),
            writer,
            quick_poller(),
            quick_launcher(),
            RestartPolicy::with_limit(2),
        );

        for _ in 0..4 {
            worker.cycle().await;
        }

        let status = board.get("flaky").unwrap();
        assert_eq!(status.health, Health::Failed);
        assert_eq!(status.restarts, 2);
        assert_eq!(worker.tracker.total(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_worker() {
        let mut board = StatusBoard::new();
        let spec = Arc::new(ServiceSpec::new("ghost", "/bin/true", 1));
        let writer = board.register(&spec).unwrap();
        let worker = ServiceWorker::observing(spec, writer, quick_poller());

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(Duration::from_millis(50), rx));

        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(true).unwrap();

        let handle = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_none());
    }
}
