use chrono::{DateTime, Local};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub ram_used_mb: f64,
    pub ram_free_mb: f64,
    pub ram_total_mb: f64,
    pub ram_percent: f64,
    pub cpu_temp: Option<f64>,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
    pub disk_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceState {
    pub name: String,
    pub active: bool,
    pub uptime: Option<String>,
}

impl ServiceState {
    pub fn inactive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: false,
            uptime: None,
        }
    }
}

/// Query counts for the trailing window, as reported by the ad-blocker database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdBlockCounts {
    pub queries: u64,
    pub blocked: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdBlockStats {
    Available {
        queries: u64,
        blocked: u64,
        percentage: f64,
    },
    Unavailable,
}

impl AdBlockStats {
    pub fn from_counts(counts: AdBlockCounts) -> Self {
        let percentage = if counts.queries > 0 {
            round_to(counts.blocked as f64 / counts.queries as f64 * 100.0, 2)
        } else {
            0.0
        };
        Self::Available {
            queries: counts.queries,
            blocked: counts.blocked,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicAddress {
    Masked(String),
    Unknown,
}

impl PublicAddress {
    /// Keeps the first two octets of a dotted quad and redacts the rest.
    pub fn mask(raw: &str) -> Self {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
            return Self::Unknown;
        }
        Self::Masked(format!("{}.{}.xxx.xxx", parts[0], parts[1]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayStatus {
    Connected(String),
    NotConnected,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkInfo {
    pub public_ip: PublicAddress,
    pub latency_ms: Option<f64>,
    pub overlay: OverlayStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TrendSample {
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DirectoryUsageEntry {
    pub path: String,
    pub name: String,
    pub size_mb: f64,
    pub size_gb: f64,
}

impl DirectoryUsageEntry {
    pub fn from_kib(path: &str, name: &str, kib: u64) -> Self {
        let mb = kib as f64 / 1024.0;
        Self {
            path: path.to_string(),
            name: name.to_string(),
            size_mb: round_to(mb, 1),
            size_gb: round_to(mb / 1024.0, 2),
        }
    }
}

pub type DirectoryBreakdown = Vec<DirectoryUsageEntry>;

/// One assembled response. Built once per request and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub system: Option<ResourceSnapshot>,
    pub services: Vec<ServiceState>,
    pub adblock: AdBlockStats,
    pub network: NetworkInfo,
    pub uptime: Option<Duration>,
    pub cpu_trend: Vec<TrendSample>,
    pub disk_breakdown: DirectoryBreakdown,
    pub generated_at: DateTime<Local>,
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// `"3d 4h 5m"`, `"4h 5m"` or `"5m"`.
pub fn format_host_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Coarsest two units only: `"3d 4h"`, `"4h 5m"` or `"5m"`.
pub fn format_service_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
