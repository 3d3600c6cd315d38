use crate::config::{ResourcesConfig, TimeoutsConfig};
use crate::probes::{run_blocking, Probe, ProbeError};
use crate::snapshot::{round_to, ResourceSnapshot};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio::fs;
use tracing::debug;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// CPU, memory, root-disk usage and the thermal-zone reading.
pub struct ResourceProbe {
    root_mount: String,
    thermal_zone_path: String,
    cpu_sample: Duration,
    timeout: Duration,
}

impl ResourceProbe {
    pub fn new(cfg: &ResourcesConfig, timeouts: &TimeoutsConfig) -> Self {
        Self {
            root_mount: cfg.root_mount.clone(),
            thermal_zone_path: cfg.thermal_zone_path.clone(),
            cpu_sample: Duration::from_millis(cfg.cpu_sample_ms),
            timeout: Duration::from_millis(timeouts.resources_ms),
        }
    }
}

#[async_trait]
impl Probe for ResourceProbe {
    type Output = ResourceSnapshot;

    fn name(&self) -> &str {
        "resources"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self) -> Result<ResourceSnapshot, ProbeError> {
        // CPU usage is the delta between two refreshes.
        let mut system = run_blocking("cpu", || {
            let mut system = System::new();
            system.refresh_cpu();
            Ok(system)
        })
        .await?;
        tokio::time::sleep(self.cpu_sample).await;

        let root_mount = self.root_mount.clone();
        let usage = run_blocking("system usage", move || {
            system.refresh_cpu();
            system.refresh_memory();
            system.refresh_disks_list();
            read_usage(&system, &root_mount)
        })
        .await?;

        let cpu_temp = read_thermal_zone(&self.thermal_zone_path).await;

        Ok(ResourceSnapshot {
            cpu_percent: round_to(usage.cpu_percent, 1),
            ram_used_mb: round_to(usage.ram_used as f64 / MIB, 1),
            ram_free_mb: round_to(usage.ram_free as f64 / MIB, 1),
            ram_total_mb: round_to(usage.ram_total as f64 / MIB, 1),
            ram_percent: round_to(percent(usage.ram_used, usage.ram_total), 1),
            cpu_temp,
            disk_used_gb: round_to(usage.disk_used as f64 / GIB, 2),
            disk_total_gb: round_to(usage.disk_total as f64 / GIB, 2),
            disk_percent: round_to(percent(usage.disk_used, usage.disk_total), 1),
        })
    }
}

/// Raw counters read from a refreshed `System`, in bytes.
struct Usage {
    cpu_percent: f64,
    ram_used: u64,
    ram_free: u64,
    ram_total: u64,
    disk_used: u64,
    disk_total: u64,
}

fn read_usage(system: &System, root_mount: &str) -> Result<Usage, ProbeError> {
    let cpu_percent = if system.cpus().is_empty() {
        0.0
    } else {
        let sum: f32 = system.cpus().iter().map(|c| c.cpu_usage()).sum();
        (sum / system.cpus().len() as f32) as f64
    };

    let ram_total = system.total_memory();
    if ram_total == 0 {
        return Err(ProbeError::Unavailable("memory accounting".to_string()));
    }
    let ram_free = system.available_memory();

    let disk = system
        .disks()
        .iter()
        .find(|d| d.mount_point() == Path::new(root_mount))
        .ok_or_else(|| ProbeError::NotFound(format!("mount {root_mount}")))?;
    let disk_total = disk.total_space();

    Ok(Usage {
        cpu_percent,
        ram_used: ram_total.saturating_sub(ram_free),
        ram_free,
        ram_total,
        disk_used: disk_total.saturating_sub(disk.available_space()),
        disk_total,
    })
}

/// Host uptime from the kernel.
pub struct HostUptimeProbe {
    timeout: Duration,
}

impl HostUptimeProbe {
    pub fn new(timeouts: &TimeoutsConfig) -> Self {
        Self {
            timeout: Duration::from_millis(timeouts.uptime_ms),
        }
    }
}

#[async_trait]
impl Probe for HostUptimeProbe {
    type Output = Duration;

    fn name(&self) -> &str {
        "uptime"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self) -> Result<Duration, ProbeError> {
        let secs = run_blocking("uptime", || Ok(System::new().uptime())).await?;
        if secs == 0 {
            return Err(ProbeError::Unavailable("boot time".to_string()));
        }
        Ok(Duration::from_secs(secs))
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

async fn read_thermal_zone(path: &str) -> Option<f64> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) => {
            debug!(path, error = %err, "thermal zone unreadable");
            return None;
        }
    };
    parse_thermal_zone(&raw)
}

/// Thermal zones report millidegrees; some drivers report plain degrees.
fn parse_thermal_zone(raw: &str) -> Option<f64> {
    let v = raw.trim().parse::<f64>().ok()?;
    let celsius = if v > 1000.0 { v / 1000.0 } else { v };
    if !celsius.is_finite() || celsius <= 0.0 {
        return None;
    }
    Some(round_to(celsius, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermal_zone_millidegrees() {
        assert_eq!(parse_thermal_zone("48312\n"), Some(48.3));
        assert_eq!(parse_thermal_zone("52"), Some(52.0));
        assert_eq!(parse_thermal_zone("garbage"), None);
        assert_eq!(parse_thermal_zone("0"), None);
    }

    #[test]
    fn percent_of_empty_total_is_zero() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[tokio::test]
    async fn missing_thermal_zone_is_absent() {
        assert_eq!(read_thermal_zone("/nonexistent/thermal_zone0/temp").await, None);
    }
}
