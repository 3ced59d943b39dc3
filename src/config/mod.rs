use crate::error::{Result, StagehandError};
use crate::health::{Backoff, RetryPolicy};
use crate::process::{LaunchConfig, RestartPolicy, ServiceSpec, SERVICE_HOST};
use crate::supervisor::SupervisorConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming the config file when none is given on the command line
pub const CONFIG_ENV: &str = "STAGEHAND_CONFIG";

/// One supervised service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (unique identifier)
    pub name: String,

    /// Executable to run
    pub command: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Port the service listens on
    pub port: u16,

    /// Extra port-conflict checks before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between port-conflict checks (in seconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Path of the status endpoint
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Wait for the status endpoint to answer after spawning
    #[serde(default = "default_true")]
    pub wait_ready: bool,

    /// Refuse to start while the port is taken
    #[serde(default = "default_true")]
    pub check_port: bool,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// Default value functions for serde
fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    10
}

fn default_health_path() -> String {
    "/status".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            port,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            health_path: default_health_path(),
            wait_ready: true,
            check_port: true,
            env: HashMap::new(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn to_spec(&self) -> ServiceSpec {
        ServiceSpec {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            port: self.port,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay(),
            health_path: self.health_path.clone(),
            wait_ready: self.wait_ready,
            check_port: self.check_port,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StagehandError::MissingConfigField("name".to_string()));
        }

        if self.command.as_os_str().is_empty() {
            return Err(StagehandError::MissingConfigField(format!(
                "command (service '{}')",
                self.name
            )));
        }

        if self.port == 0 {
            return Err(StagehandError::ConfigValidationError(format!(
                "Service '{}' must have a non-zero port",
                self.name
            )));
        }

        if !self.health_path.starts_with('/') {
            return Err(StagehandError::ConfigValidationError(format!(
                "health_path of '{}' must start with '/': {}",
                self.name, self.health_path
            )));
        }

        // Validate working directory exists if specified
        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(StagehandError::ConfigValidationError(format!(
                    "Working directory of '{}' does not exist: {}",
                    self.name,
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    fn expand_env_vars(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        self.command = expand_env_in_path(&self.command, lookup);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd, lookup));
        }

        self.args = self
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg, lookup))
            .collect();

        // Values only
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v, lookup)))
            .collect();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    /// Pause after spawning before the liveness check (in milliseconds)
    pub settle_ms: u64,
    /// Pause between consecutive service starts (in seconds)
    pub start_interval_secs: u64,
    /// Grace period between SIGTERM and SIGKILL (in seconds)
    pub stop_timeout_secs: u64,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            start_interval_secs: 5,
            stop_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Retry shape of every health poll and inter-stage call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
    pub backoff: BackoffKind,
    /// Cap for exponential backoff (in seconds)
    pub max_delay_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_secs: 5,
            timeout_secs: 5,
            backoff: BackoffKind::Fixed,
            max_delay_secs: 60,
        }
    }
}

impl HealthSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max_delay: Duration::from_secs(self.max_delay_secs),
            },
        };

        RetryPolicy::new(
            self.attempts,
            Duration::from_secs(self.retry_delay_secs),
            Duration::from_secs(self.timeout_secs),
        )
        .with_backoff(backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub poll_interval_secs: u64,
    /// Mark a service failed after this many restarts without a healthy poll
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_restarts: Option<u32>,
    /// Minimum pause between restart attempts (in seconds)
    pub restart_delay_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_consecutive_restarts: None,
            restart_delay_secs: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub refresh_ms: u64,
    /// Metrics shown per service before the list is cut
    pub max_metrics: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            refresh_ms: 1000,
            max_metrics: 22,
        }
    }
}

/// Whole orchestrator configuration, loaded once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for orchestrator and service logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub launcher: LauncherSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub dashboard: DashboardSettings,

    /// Services in dependency (start) order
    pub services: Vec<ServiceConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            launcher: LauncherSettings::default(),
            health: HealthSettings::default(),
            supervisor: SupervisorSettings::default(),
            dashboard: DashboardSettings::default(),
            services: default_services(),
        }
    }
}

impl PipelineConfig {
    /// Resolve the configuration: explicit path, then `STAGEHAND_CONFIG`, then
    /// the built-in pipeline. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StagehandError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        // Determine format based on file extension
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(StagehandError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        let lookup = |key: &str| std::env::var(key).ok();
        for service in &mut config.services {
            service.expand_env_vars(&lookup);
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| StagehandError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| StagehandError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `STAGEHAND_*` overrides read through `lookup`
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = parse_override::<u64>(&lookup, "STAGEHAND_POLL_INTERVAL_SECS")? {
            self.supervisor.poll_interval_secs = v;
        }
        if let Some(v) = parse_override::<u32>(&lookup, "STAGEHAND_POLL_ATTEMPTS")? {
            self.health.attempts = v;
        }
        if let Some(v) = parse_override::<u64>(&lookup, "STAGEHAND_POLL_RETRY_DELAY_SECS")? {
            self.health.retry_delay_secs = v;
        }
        if let Some(v) = parse_override::<u64>(&lookup, "STAGEHAND_POLL_TIMEOUT_SECS")? {
            self.health.timeout_secs = v;
        }
        if let Some(v) = parse_override::<u32>(&lookup, "STAGEHAND_MAX_CONSECUTIVE_RESTARTS")? {
            self.supervisor.max_consecutive_restarts = Some(v);
        }
        if let Some(dir) = lookup("STAGEHAND_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(StagehandError::ConfigValidationError(
                "At least one service must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for service in &self.services {
            service.validate()?;

            if !names.insert(service.name.as_str()) {
                return Err(StagehandError::ConfigValidationError(format!(
                    "Duplicate service name: {}",
                    service.name
                )));
            }
            if !ports.insert(service.port) {
                return Err(StagehandError::ConfigValidationError(format!(
                    "Port {} is used by more than one service",
                    service.port
                )));
            }
        }

        if self.health.attempts == 0 {
            return Err(StagehandError::ConfigValidationError(
                "health.attempts must be at least 1".to_string(),
            ));
        }

        if self.health.timeout_secs == 0 {
            return Err(StagehandError::ConfigValidationError(
                "health.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.supervisor.poll_interval_secs == 0 {
            return Err(StagehandError::ConfigValidationError(
                "supervisor.poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.dashboard.refresh_ms == 0 {
            return Err(StagehandError::ConfigValidationError(
                "dashboard.refresh_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Service specs in start order
    pub fn specs(&self) -> Vec<Arc<ServiceSpec>> {
        self.services
            .iter()
            .map(|s| Arc::new(s.to_spec()))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.health.retry_policy()
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            settle_window: Duration::from_millis(self.launcher.settle_ms),
            start_interval: Duration::from_secs(self.launcher.start_interval_secs),
            stop_timeout: Duration::from_secs(self.launcher.stop_timeout_secs),
            readiness: self.retry_policy(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let mut restart = match self.supervisor.max_consecutive_restarts {
            Some(limit) => RestartPolicy::with_limit(limit),
            None => RestartPolicy::new(),
        };
        restart.delay = Duration::from_secs(self.supervisor.restart_delay_secs);
        restart.backoff = self.retry_policy().backoff;

        SupervisorConfig {
            poll_interval: Duration::from_secs(self.supervisor.poll_interval_secs),
            restart,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| StagehandError::ConfigError(format!("Failed to serialize config: {}", e)))
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            StagehandError::ConfigError(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
        None => Ok(None),
    }
}

/// The toy pipeline: generate -> normalize -> train -> consume
pub fn default_services() -> Vec<ServiceConfig> {
    let command = stage_binary();
    let stages = [
        ("Gerador de Dados", "generate", 8001_u16, None),
        ("Normalizador", "normalize", 8002, Some(8001_u16)),
        ("Treinador", "train", 8003, Some(8002)),
        ("Consumidor", "consume", 8005, Some(8003)),
    ];

    stages
        .into_iter()
        .map(|(name, stage, port, upstream)| {
            let mut args = vec![stage.to_string(), "--port".to_string(), port.to_string()];
            if let Some(upstream) = upstream {
                args.push("--upstream".to_string());
                args.push(format!("http://{}:{}", SERVICE_HOST, upstream));
            }

            let mut service = ServiceConfig::new(name, command.clone(), port);
            service.args = args;
            service
        })
        .collect()
}

/// `stagehand-stage` next to the running executable, or from `PATH`
fn stage_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("stagehand-stage")))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from("stagehand-stage"))
}

/// Expand `$VAR` and `${VAR}`; unknown variables are left untouched
fn expand_env_in_string(s: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), lookup(name)) {
            (false, Some(value)) => result.push_str(&value),
            _ => result.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    result.push_str(rest);
    result
}

fn expand_env_in_path(path: &Path, lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy(), lookup))
}
