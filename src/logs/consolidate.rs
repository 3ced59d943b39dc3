use crate::error::{Result, StagehandError};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Default name of the combined file, written next to the logs
pub const COMBINED_LOG_NAME: &str = "stagehand-logs-combined.txt";

/// Every `*.log` file directly under `log_dir`, sorted by name.
///
/// Rotated files (`{service}-out-{timestamp}.log`) sort before the live
/// `{service}-out.log`, so each stream reads oldest first.
pub async fn collect_log_files(log_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(log_dir).await.map_err(|e| {
        StagehandError::LogError(format!("Failed to read {}: {}", log_dir.display(), e))
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StagehandError::LogError(format!("Failed to read directory entry: {}", e)))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && path.extension().is_some_and(|ext| ext == "log") {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Concatenate every log file of `log_dir` into `output`, each under a
/// `--- {file name} ---` header. With `remove`, the sources are deleted once the
/// combined file is written. Returns the files that were included.
pub async fn consolidate(log_dir: &Path, output: &Path, remove: bool) -> Result<Vec<PathBuf>> {
    let files: Vec<PathBuf> = collect_log_files(log_dir)
        .await?
        .into_iter()
        .filter(|path| path != output)
        .collect();

    if files.is_empty() {
        tracing::info!(log_dir = %log_dir.display(), "No log files to consolidate");
        return Ok(files);
    }

    let mut combined = tokio::fs::File::create(output).await.map_err(|e| {
        StagehandError::LogFileError(format!("{}: {}", output.display(), e))
    })?;

    for path in &files {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| StagehandError::LogFileError(format!("{}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let header = format!("--- {} ---\n", name);
        combined.write_all(header.as_bytes()).await.map_err(write_error)?;
        combined.write_all(&contents).await.map_err(write_error)?;
        combined.write_all(b"\n").await.map_err(write_error)?;
    }

    combined.flush().await.map_err(write_error)?;

    tracing::info!(
        files = files.len(),
        output = %output.display(),
        "Consolidated service logs"
    );

    if remove {
        for path in &files {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(file = %path.display(), "Failed to remove log file: {}", e);
            }
        }
    }

    Ok(files)
}

fn write_error(e: std::io::Error) -> StagehandError {
    StagehandError::LogError(format!("Failed to write combined log: {}", e))
}
