use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub breakdown: BreakdownConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub adblock: AdBlockConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryConfig {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrendConfig {
    #[serde(default = "default_trend_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_trend_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakdownConfig {
    #[serde(default = "default_breakdown_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourcesConfig {
    #[serde(default = "default_root_mount")]
    pub root_mount: String,
    #[serde(default = "default_thermal_zone_path")]
    pub thermal_zone_path: String,
    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdBlockConfig {
    #[serde(default = "default_adblock_db_path")]
    pub db_path: String,
    #[serde(default = "default_blocked_statuses")]
    pub blocked_statuses: Vec<u32>,
    #[serde(default = "default_adblock_window_secs")]
    pub window_secs: u64,
    /// Program and leading arguments of the sqlite shell, e.g.
    /// `[pihole-FTL, sqlite3]` on installs without a system sqlite3.
    #[serde(default = "default_sqlite_command")]
    pub sqlite_command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_ip_echo_url")]
    pub ip_echo_url: String,
    #[serde(default = "default_ping_host")]
    pub ping_host: String,
    #[serde(default = "default_overlay_cli")]
    pub overlay_cli: String,
    #[serde(default = "default_overlay_interface")]
    pub overlay_interface: String,
    #[serde(default = "default_ip_command")]
    pub ip_command: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_resources_timeout_ms")]
    pub resources_ms: u64,
    #[serde(default = "default_uptime_timeout_ms")]
    pub uptime_ms: u64,
    #[serde(default = "default_service_timeout_ms")]
    pub service_ms: u64,
    #[serde(default = "default_adblock_timeout_ms")]
    pub adblock_ms: u64,
    #[serde(default = "default_public_ip_timeout_ms")]
    pub public_ip_ms: u64,
    #[serde(default = "default_latency_timeout_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_overlay_timeout_ms")]
    pub overlay_ms: u64,
    #[serde(default = "default_overlay_fallback_timeout_ms")]
    pub overlay_fallback_ms: u64,
    #[serde(default = "default_directory_timeout_ms")]
    pub directory_ms: u64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_trend_interval_secs(),
            capacity: default_trend_capacity(),
        }
    }
}

impl Default for BreakdownConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_breakdown_ttl_secs(),
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            root_mount: default_root_mount(),
            thermal_zone_path: default_thermal_zone_path(),
            cpu_sample_ms: default_cpu_sample_ms(),
        }
    }
}

impl Default for AdBlockConfig {
    fn default() -> Self {
        Self {
            db_path: default_adblock_db_path(),
            blocked_statuses: default_blocked_statuses(),
            window_secs: default_adblock_window_secs(),
            sqlite_command: default_sqlite_command(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip_echo_url: default_ip_echo_url(),
            ping_host: default_ping_host(),
            overlay_cli: default_overlay_cli(),
            overlay_interface: default_overlay_interface(),
            ip_command: default_ip_command(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            resources_ms: default_resources_timeout_ms(),
            uptime_ms: default_uptime_timeout_ms(),
            service_ms: default_service_timeout_ms(),
            adblock_ms: default_adblock_timeout_ms(),
            public_ip_ms: default_public_ip_timeout_ms(),
            latency_ms: default_latency_timeout_ms(),
            overlay_ms: default_overlay_timeout_ms(),
            overlay_fallback_ms: default_overlay_fallback_timeout_ms(),
            directory_ms: default_directory_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.trend.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "trend.interval_secs must be >= 1".to_string(),
            ));
        }
        if self.trend.capacity < 1 {
            return Err(ConfigError::Validation(
                "trend.capacity must be >= 1".to_string(),
            ));
        }
        if self.breakdown.ttl_secs < 1 {
            return Err(ConfigError::Validation(
                "breakdown.ttl_secs must be >= 1".to_string(),
            ));
        }

        if self.resources.cpu_sample_ms < 200 {
            return Err(ConfigError::Validation(
                "resources.cpu_sample_ms must be >= 200".to_string(),
            ));
        }
        if self.resources.cpu_sample_ms >= self.timeouts.resources_ms {
            return Err(ConfigError::Validation(
                "resources.cpu_sample_ms must be below timeouts.resources_ms".to_string(),
            ));
        }

        validate_services(&self.services)?;
        validate_directories(&self.directories)?;
        validate_timeouts(&self.timeouts)?;

        if self.adblock.window_secs < 1 {
            return Err(ConfigError::Validation(
                "adblock.window_secs must be >= 1".to_string(),
            ));
        }
        if self
            .adblock
            .sqlite_command
            .first()
            .map_or(true, |program| program.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "adblock.sqlite_command must name a program".to_string(),
            ));
        }
        if self.network.ip_command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "network.ip_command must not be empty".to_string(),
            ));
        }
        if self.network.ping_host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "network.ping_host must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_services(services: &[String]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for name in services {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services[*] must not be empty".to_string(),
            ));
        }
        if !names.insert(name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "service '{name}' is listed more than once"
            )));
        }
    }
    Ok(())
}

fn validate_directories(dirs: &[DirectoryConfig]) -> Result<(), ConfigError> {
    let mut paths = HashSet::new();
    for dir in dirs {
        if dir.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "directories[*].path must not be empty".to_string(),
            ));
        }
        if !paths.insert(dir.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "directory '{}' is listed more than once",
                dir.path
            )));
        }
    }
    Ok(())
}

fn validate_timeouts(t: &TimeoutsConfig) -> Result<(), ConfigError> {
    let all = [
        ("resources_ms", t.resources_ms),
        ("uptime_ms", t.uptime_ms),
        ("service_ms", t.service_ms),
        ("adblock_ms", t.adblock_ms),
        ("public_ip_ms", t.public_ip_ms),
        ("latency_ms", t.latency_ms),
        ("overlay_ms", t.overlay_ms),
        ("overlay_fallback_ms", t.overlay_fallback_ms),
        ("directory_ms", t.directory_ms),
    ];
    for (name, value) in all {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "timeouts.{name} must be > 0"
            )));
        }
    }
    Ok(())
}

const fn default_trend_interval_secs() -> u64 {
    60
}

const fn default_trend_capacity() -> usize {
    60
}

const fn default_breakdown_ttl_secs() -> u64 {
    43_200
}

fn default_root_mount() -> String {
    "/".to_string()
}

fn default_thermal_zone_path() -> String {
    "/sys/class/thermal/thermal_zone0/temp".to_string()
}

const fn default_cpu_sample_ms() -> u64 {
    1000
}

fn default_adblock_db_path() -> String {
    "/etc/pihole/pihole-FTL.db".to_string()
}

fn default_blocked_statuses() -> Vec<u32> {
    vec![1, 4, 5, 6, 7, 8, 9, 10, 11]
}

const fn default_adblock_window_secs() -> u64 {
    86_400
}

fn default_sqlite_command() -> Vec<String> {
    vec!["sqlite3".to_string()]
}

fn default_ip_echo_url() -> String {
    "https://api.ipify.org?format=json".to_string()
}

fn default_ping_host() -> String {
    "1.1.1.1".to_string()
}

fn default_overlay_cli() -> String {
    "/usr/bin/tailscale".to_string()
}

fn default_overlay_interface() -> String {
    "tailscale0".to_string()
}

fn default_ip_command() -> String {
    "ip".to_string()
}

const fn default_resources_timeout_ms() -> u64 {
    5000
}

const fn default_uptime_timeout_ms() -> u64 {
    2000
}

const fn default_service_timeout_ms() -> u64 {
    2000
}

const fn default_adblock_timeout_ms() -> u64 {
    5000
}

const fn default_public_ip_timeout_ms() -> u64 {
    5000
}

const fn default_latency_timeout_ms() -> u64 {
    5000
}

const fn default_overlay_timeout_ms() -> u64 {
    3000
}

const fn default_overlay_fallback_timeout_ms() -> u64 {
    2000
}

const fn default_directory_timeout_ms() -> u64 {
    10_000
}
