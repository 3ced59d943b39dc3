use crate::logs::writer::{LogStream, LogWriter};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;

/// Drain a child's stdout/stderr in background tasks.
///
/// Every line is echoed at `debug` level under the `service_output` target and,
/// when a log directory is configured, appended to the service's log file.
/// Pipes are always drained so a chatty child never blocks on a full buffer.
pub fn capture_output(service: &str, child: &mut Child, log_dir: Option<&Path>) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_stream_task(
            service.to_string(),
            LogStream::Stdout,
            stdout,
            log_dir.map(Path::to_path_buf),
        ));
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_stream_task(
            service.to_string(),
            LogStream::Stderr,
            stderr,
            log_dir.map(Path::to_path_buf),
        ));
    }
}

async fn read_stream_task<R>(
    service: String,
    stream: LogStream,
    reader: R,
    log_dir: Option<PathBuf>,
) where
    R: AsyncRead + Unpin,
{
    let mut writer = match log_dir {
        Some(ref dir) => match LogWriter::open(dir, &service, stream).await {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(service = %service, "Output capture disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            // EOF - process closed the pipe
            Ok(0) => break,
            Ok(_) => {
                tracing::debug!(
                    target: "service_output",
                    service = %service,
                    stream = ?stream,
                    "{}",
                    String::from_utf8_lossy(&line).trim_end()
                );
                if let Some(ref mut w) = writer {
                    if let Err(e) = w.write_line(&line).await {
                        tracing::warn!(service = %service, "Failed to write captured output: {}", e);
                        writer = None;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(service = %service, stream = ?stream, "Output capture stopped: {}", e);
                break;
            }
        }
    }

    if let Some(mut w) = writer {
        let _ = w.flush().await;
    }
}
