use crate::error::{Result, StagehandError};
use crate::process::types::ServiceSpec;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a service process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn the process described by a service spec
///
/// Applies arguments, working directory and environment, and captures
/// stdout/stderr as pipes. The child is killed if its handle is dropped, so a
/// cancelled launch never leaves an orphan behind.
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(StagehandError::SpawnError)` - Missing executable or OS refusal
pub fn spawn_service(spec: &ServiceSpec) -> Result<SpawnedProcess> {
    let mut command = Command::new(&spec.command);

    command.args(&spec.args);

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    for (key, value) in &spec.env {
        command.env(key, value);
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => StagehandError::SpawnError(format!(
            "Executable for '{}' not found: {}",
            spec.name,
            spec.command.display()
        )),
        _ => StagehandError::SpawnError(format!(
            "Failed to spawn process '{}': {}",
            spec.name, e
        )),
    })?;

    let pid = child.id().ok_or_else(|| {
        StagehandError::SpawnError(format!("Failed to get PID for process '{}'", spec.name))
    })?;

    Ok(SpawnedProcess { child, pid })
}
