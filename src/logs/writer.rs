use crate::error::{Result, StagehandError};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

/// Default maximum log file size before rotation (10MB)
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Which output stream of a child process a log file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    fn suffix(&self) -> &'static str {
        match self {
            LogStream::Stdout => "out",
            LogStream::Stderr => "err",
        }
    }
}

/// Appends timestamped lines of one service stream to a file, rotating by size
pub struct LogWriter {
    path: PathBuf,
    file: TokioFile,
    max_size: u64,
    size: u64,
}

impl LogWriter {
    /// Open (or create) `{log_dir}/{service}-{out|err}.log`
    pub async fn open(log_dir: &Path, service: &str, stream: LogStream) -> Result<Self> {
        Self::with_max_size(log_dir, service, stream, DEFAULT_MAX_LOG_SIZE).await
    }

    pub async fn with_max_size(
        log_dir: &Path,
        service: &str,
        stream: LogStream,
        max_size: u64,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(log_dir)
            .await
            .map_err(|e| StagehandError::LogError(format!("Failed to create log directory: {}", e)))?;

        let path = log_path(log_dir, service, stream);
        let file = open_append(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path,
            file: TokioFile::from_std(file),
            max_size,
            size,
        })
    }

    /// Write one line with a `[YYYY-MM-DD HH:MM:SS.mmm]` prefix
    pub async fn write_line(&mut self, data: &[u8]) -> Result<()> {
        if self.size >= self.max_size {
            self.rotate().await?;
        }

        let entry = format_log_entry(&Local::now(), data);

        self.file
            .write_all(&entry)
            .await
            .map_err(|e| StagehandError::LogError(format!("Failed to write to log: {}", e)))?;
        self.file
            .flush()
            .await
            .map_err(|e| StagehandError::LogError(format!("Failed to flush log: {}", e)))?;

        self.size += entry.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| StagehandError::LogError(format!("Failed to flush log: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the current file with a timestamp suffix and start a fresh one
    async fn rotate(&mut self) -> Result<()> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StagehandError::LogError("Invalid log file name".to_string()))?;
        let rotated = self.path.with_file_name(format!("{}-{}.log", stem, timestamp));

        self.flush().await?;
        tokio::fs::rename(&self.path, &rotated)
            .await
            .map_err(|e| StagehandError::LogError(format!("Failed to rotate log: {}", e)))?;

        self.file = TokioFile::from_std(open_append(&self.path)?);
        self.size = 0;
        Ok(())
    }
}

/// Path of a service's log file; the name is reduced to filesystem-safe characters
pub fn log_path(log_dir: &Path, service: &str, stream: LogStream) -> PathBuf {
    let safe: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    log_dir.join(format!("{}-{}.log", safe, stream.suffix()))
}

fn open_append(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StagehandError::LogFileError(format!("{}: {}", path.display(), e)))
}

fn format_log_entry(timestamp: &DateTime<Local>, data: &[u8]) -> Vec<u8> {
    let timestamp_str = timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    let mut entry = Vec::with_capacity(timestamp_str.len() + 3 + data.len() + 1);

    entry.extend_from_slice(b"[");
    entry.extend_from_slice(timestamp_str.as_bytes());
    entry.extend_from_slice(b"] ");
    entry.extend_from_slice(data);

    if !data.ends_with(b"\n") {
        entry.push(b'\n');
    }

    entry
}
