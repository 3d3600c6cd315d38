use crate::config::TimeoutsConfig;
use crate::probes::{run_command, Probe, ProbeError};
use crate::snapshot::{format_service_uptime, ServiceState};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;
use tracing::debug;

const SYSTEMCTL: &str = "systemctl";

/// Liveness and uptime of one systemd unit.
pub struct ServiceProbe {
    service: String,
    timeout: Duration,
}

impl ServiceProbe {
    pub fn new(service: &str, timeouts: &TimeoutsConfig) -> Self {
        Self {
            service: service.to_string(),
            timeout: Duration::from_millis(timeouts.service_ms),
        }
    }

    async fn activated_at(&self) -> Result<String, ProbeError> {
        let out = run_command(
            SYSTEMCTL,
            &[
                "show",
                &self.service,
                "--property=ActiveEnterTimestamp",
                "--value",
            ],
            self.timeout,
        )
        .await?
        .require_success(SYSTEMCTL)?;
        Ok(out.stdout)
    }
}

#[async_trait]
impl Probe for ServiceProbe {
    type Output = ServiceState;

    fn name(&self) -> &str {
        &self.service
    }

    fn timeout(&self) -> Duration {
        // Two sequential commands.
        self.timeout * 2
    }

    async fn invoke(&self) -> Result<ServiceState, ProbeError> {
        // is-active exits non-zero for inactive units, so only stdout counts.
        let out = run_command(SYSTEMCTL, &["is-active", &self.service], self.timeout).await?;
        if out.stdout.trim() != "active" {
            return Ok(ServiceState::inactive(&self.service));
        }

        let uptime = match self.activated_at().await {
            Ok(raw) => uptime_since(&raw, Utc::now()),
            Err(err) => {
                debug!(service = %self.service, error = %err, "activation time lookup failed");
                None
            }
        };

        Ok(ServiceState {
            name: self.service.clone(),
            active: true,
            uptime,
        })
    }
}

fn uptime_since(raw: &str, now: DateTime<Utc>) -> Option<String> {
    let activated = parse_activation_timestamp(raw)?;
    let elapsed = now.signed_duration_since(activated).to_std().ok()?;
    Some(format_service_uptime(elapsed))
}

/// Accepts `@<epoch>`, RFC 3339, and systemd's `Mon 2024-01-15 10:30:00 UTC`
/// with or without the weekday and zone. Zones other than UTC/GMT are taken
/// as local time, which is what systemd prints them in.
pub fn parse_activation_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "n/a" {
        return None;
    }

    if let Some(epoch) = raw.strip_prefix('@') {
        let secs = epoch.trim().parse::<i64>().ok()?;
        return DateTime::from_timestamp(secs, 0);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let (body, zone) = match raw.rsplit_once(' ') {
        Some((body, zone)) if zone.chars().all(|c| c.is_ascii_alphabetic()) => (body, Some(zone)),
        _ => (raw, None),
    };

    for fmt in ["%a %Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        let Ok(naive) = NaiveDateTime::parse_from_str(body, fmt) else {
            continue;
        };
        return match zone {
            Some("UTC") | Some("GMT") => Some(naive.and_utc()),
            _ => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        };
    }

    None
}
