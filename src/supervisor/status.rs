use crate::error::{Result, StagehandError};
use crate::process::ServiceSpec;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::watch;

/// Health of a service as last observed by its worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Not polled yet
    Unknown,
    /// Status endpoint answers with a ready word
    Online,
    /// Status endpoint answers, but the service reports it is not ready
    Degraded,
    /// Status endpoint unreachable or malformed after all attempts
    Offline,
    /// Restart budget spent; the service is no longer restarted
    Failed,
}

impl Health {
    pub fn symbol(&self) -> &'static str {
        match self {
            Health::Unknown => "?",
            Health::Online => "●",
            Health::Degraded => "◐",
            Health::Offline => "○",
            Health::Failed => "✖",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Health::Online)
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Unknown => write!(f, "unknown"),
            Health::Online => write!(f, "online"),
            Health::Degraded => write!(f, "degraded"),
            Health::Offline => write!(f, "offline"),
            Health::Failed => write!(f, "failed"),
        }
    }
}

/// Last observed state of one service. Overwritten on every cycle, no history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub port: u16,
    pub health: Health,
    pub last_checked_at: Option<DateTime<Local>>,
    /// Fields of the status payload other than `status`; empty when unreachable
    pub metrics: Map<String, Value>,
    pub restarts: u32,
    pub pid: Option<u32>,
    /// Status word when degraded, error text when offline
    pub detail: Option<String>,
}

impl ServiceStatus {
    pub fn unknown(spec: &ServiceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            port: spec.port,
            health: Health::Unknown,
            last_checked_at: None,
            metrics: Map::new(),
            restarts: 0,
            pid: None,
            detail: None,
        }
    }
}

/// Read side of the status table.
///
/// One `watch` channel per service keeps the table partitioned by name: the
/// matching [`StatusWriter`] is the only way to change an entry, so each entry
/// has exactly one writer and readers never block it.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    entries: Vec<(String, watch::Receiver<ServiceStatus>)>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry for `spec` and hand back its single writer
    pub fn register(&mut self, spec: &ServiceSpec) -> Result<StatusWriter> {
        if self.entries.iter().any(|(name, _)| name == &spec.name) {
            return Err(StagehandError::ConfigValidationError(format!(
                "Service '{}' registered twice",
                spec.name
            )));
        }

        let (tx, rx) = watch::channel(ServiceStatus::unknown(spec));
        self.entries.push((spec.name.clone(), rx));
        Ok(StatusWriter { tx })
    }

    /// Current status of every service, in registration order
    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        self.entries
            .iter()
            .map(|(_, rx)| rx.borrow().clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rx)| rx.borrow().clone())
    }

    /// Change notifications for one service
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<ServiceStatus>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rx)| rx.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write side of one status entry. Not `Clone`.
#[derive(Debug)]
pub struct StatusWriter {
    tx: watch::Sender<ServiceStatus>,
}

impl StatusWriter {
    pub fn update(&self, modify: impl FnOnce(&mut ServiceStatus)) {
        self.tx.send_modify(modify);
    }

    pub fn current(&self) -> ServiceStatus {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, port: u16) -> ServiceSpec {
        ServiceSpec::new(name, "/bin/true", port)
    }

    #[test]
    fn test_register_starts_unknown() {
        let mut board = StatusBoard::new();
        let _writer = board.register(&spec("gerador", 8001)).unwrap();

        let status = board.get("gerador").unwrap();
        assert_eq!(status.health, Health::Unknown);
        assert_eq!(status.port, 8001);
        assert!(status.last_checked_at.is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut board = StatusBoard::new();
        let _writer = board.register(&spec("gerador", 8001)).unwrap();
        assert!(board.register(&spec("gerador", 8002)).is_err());
    }

    #[test]
    fn test_writer_only_touches_its_entry() {
        let mut board = StatusBoard::new();
        let first = board.register(&spec("a", 1)).unwrap();
        let _second = board.register(&spec("b", 2)).unwrap();

        first.update(|s| {
            s.health = Health::Online;
            s.restarts = 2;
        });

        let snapshot = board.snapshot();
        assert_eq!(snapshot[0].health, Health::Online);
        assert_eq!(snapshot[0].restarts, 2);
        assert_eq!(snapshot[1].health, Health::Unknown);
    }

    #[test]
    fn test_clones_share_entries() {
        let mut board = StatusBoard::new();
        let writer = board.register(&spec("a", 1)).unwrap();
        let reader = board.clone();

        writer.update(|s| s.health = Health::Offline);
        assert_eq!(reader.get("a").unwrap().health, Health::Offline);
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let mut board = StatusBoard::new();
        let writer = board.register(&spec("a", 1)).unwrap();
        let mut rx = board.subscribe("a").unwrap();

        writer.update(|s| s.health = Health::Degraded);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().health, Health::Degraded);
    }

    #[test]
    fn test_status_serializes_with_check_time() {
        let mut status = ServiceStatus::unknown(&spec("gerador", 8001));
        status.health = Health::Online;
        status.last_checked_at = Some(Local::now());
        status.metrics.insert("buffer_size".to_string(), Value::from(12));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["health"], "online");
        assert_eq!(json["metrics"]["buffer_size"], 12);
        assert!(json["last_checked_at"].is_string());
        assert!(json["pid"].is_null());
    }
}
