use thiserror::Error;

/// Main error type for the stagehand orchestrator
#[derive(Debug, Error)]
pub enum StagehandError {
    // Launch errors
    #[error("Port {port} for service '{service}' still in use after {attempts} attempt(s)")]
    PortConflict {
        service: String,
        port: u16,
        attempts: u32,
    },

    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Service '{service}' exited right after start ({status})")]
    ImmediateExit { service: String, status: String },

    #[error("Failed to stop service {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Launch of '{0}' cancelled by shutdown")]
    Cancelled(String),

    // Health polling errors
    #[error("{url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Malformed status response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Log capture errors
    #[error("Log error: {0}")]
    LogError(String),

    #[error("Failed to open log file: {0}")]
    LogFileError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StagehandError {
    /// Malformed payloads are logged at a lower severity than transport failures
    pub fn is_malformed(&self) -> bool {
        matches!(self, StagehandError::MalformedResponse { .. })
    }
}

/// Result type alias for stagehand operations
pub type Result<T> = std::result::Result<T, StagehandError>;
