// Logs module - capture and consolidation of service stdout/stderr

mod capture;
mod consolidate;
mod writer;

pub use capture::capture_output;
pub use consolidate::{collect_log_files, consolidate, COMBINED_LOG_NAME};
pub use writer::{log_path, LogStream, LogWriter, DEFAULT_MAX_LOG_SIZE};
