use crate::config::{DirectoryConfig, TimeoutsConfig};
use crate::probes::{run_command, Probe, ProbeError};
use crate::snapshot::DirectoryUsageEntry;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

const DU: &str = "du";

/// Recursive size of one directory.
pub struct DirectorySizeProbe {
    path: String,
    display_name: String,
    timeout: Duration,
}

impl DirectorySizeProbe {
    pub fn new(cfg: &DirectoryConfig, timeouts: &TimeoutsConfig) -> Self {
        Self {
            path: cfg.path.clone(),
            display_name: cfg
                .name
                .clone()
                .unwrap_or_else(|| display_name_for(&cfg.path)),
            timeout: Duration::from_millis(timeouts.directory_ms),
        }
    }
}

#[async_trait]
impl Probe for DirectorySizeProbe {
    type Output = DirectoryUsageEntry;

    fn name(&self) -> &str {
        &self.path
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self) -> Result<DirectoryUsageEntry, ProbeError> {
        tokio::fs::metadata(&self.path)
            .await
            .map_err(|err| ProbeError::from_io(&self.path, err))?;

        // du exits 1 when some subdirectory is unreadable but still prints a total.
        let out = run_command(DU, &["-sk", &self.path], self.timeout).await?;
        let kib = parse_du_kib(&out.stdout).ok_or_else(|| {
            if out.success {
                ProbeError::ParseFailure(format!("du output for {}", self.path))
            } else {
                ProbeError::CommandFailed {
                    program: DU.to_string(),
                    code: out.code,
                }
            }
        })?;

        Ok(DirectoryUsageEntry::from_kib(
            &self.path,
            &self.display_name,
            kib,
        ))
    }
}

fn parse_du_kib(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .last()?
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()
}

fn display_name_for(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
