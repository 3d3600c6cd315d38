pub mod adblock;
pub mod directories;
pub mod network;
pub mod resources;
pub mod services;

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::task;
use tokio::time;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected output: {0}")]
    ParseFailure(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("`{program}` exited with status {code:?}")]
    CommandFailed { program: String, code: Option<i32> },
}

impl ProbeError {
    pub fn from_io(what: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(what.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(what.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout(Duration::ZERO),
            _ => Self::Unavailable(format!("{what}: {err}")),
        }
    }
}

/// A bounded, fallible accessor for one data source.
#[async_trait]
pub trait Probe: Send + Sync {
    type Output: Send;

    fn name(&self) -> &str;

    fn timeout(&self) -> Duration;

    async fn invoke(&self) -> Result<Self::Output, ProbeError>;
}

/// Invokes the probe, turning an overrun of its timeout into `ProbeError::Timeout`.
pub async fn run_bounded<P>(probe: &P) -> Result<P::Output, ProbeError>
where
    P: Probe + ?Sized,
{
    let limit = probe.timeout();
    match time::timeout(limit, probe.invoke()).await {
        Ok(result) => result,
        Err(_elapsed) => Err(ProbeError::Timeout(limit)),
    }
}

/// Runs synchronous work on the blocking pool so a stuck syscall cannot hold
/// an async worker past the probe's timeout.
pub async fn run_blocking<T, F>(what: &str, work: F) -> Result<T, ProbeError>
where
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| ProbeError::Unavailable(format!("{what}: {err}")))?
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
}

impl CommandOutput {
    pub fn require_success(self, program: &str) -> Result<Self, ProbeError> {
        if self.success {
            Ok(self)
        } else {
            Err(ProbeError::CommandFailed {
                program: program.to_string(),
                code: self.code,
            })
        }
    }
}

/// Runs an external command with a hard timeout. The child is killed if the
/// timeout fires.
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, ProbeError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| ProbeError::from_io(program, err))?;

    let output = match time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(ProbeError::from_io(program, err)),
        Err(_elapsed) => return Err(ProbeError::Timeout(timeout)),
    };

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}
