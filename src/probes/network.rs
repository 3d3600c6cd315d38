use crate::config::{NetworkConfig, TimeoutsConfig};
use crate::probes::{run_command, Probe, ProbeError};
use crate::snapshot::{OverlayStatus, PublicAddress};
use async_trait::async_trait;
use reqwest::Client;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

const PING: &str = "ping";

#[derive(Debug, serde::Deserialize)]
struct IpEcho {
    ip: String,
}

/// Public address from an address-echo service, masked before it leaves the probe.
pub struct PublicIpProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl PublicIpProbe {
    pub fn new(client: Client, cfg: &NetworkConfig, timeouts: &TimeoutsConfig) -> Self {
        Self {
            client,
            url: cfg.ip_echo_url.clone(),
            timeout: Duration::from_millis(timeouts.public_ip_ms),
        }
    }
}

#[async_trait]
impl Probe for PublicIpProbe {
    type Output = PublicAddress;

    fn name(&self) -> &str {
        "public_ip"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self) -> Result<PublicAddress, ProbeError> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| map_reqwest(err, self.timeout))?;

        if !resp.status().is_success() {
            return Err(ProbeError::Unavailable(format!(
                "{} returned {}",
                self.url,
                resp.status().as_u16()
            )));
        }

        let echo: IpEcho = resp
            .json()
            .await
            .map_err(|err| ProbeError::ParseFailure(err.to_string()))?;
        Ok(PublicAddress::mask(&echo.ip))
    }
}

fn map_reqwest(err: reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Unavailable(err.to_string())
    }
}

/// Round-trip time of a single ICMP echo.
pub struct LatencyProbe {
    host: String,
    timeout: Duration,
}

impl LatencyProbe {
    pub fn new(cfg: &NetworkConfig, timeouts: &TimeoutsConfig) -> Self {
        Self {
            host: cfg.ping_host.clone(),
            timeout: Duration::from_millis(timeouts.latency_ms),
        }
    }
}

#[async_trait]
impl Probe for LatencyProbe {
    type Output = f64;

    fn name(&self) -> &str {
        "latency"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self) -> Result<f64, ProbeError> {
        let out = run_command(PING, &["-c", "1", "-W", "2", &self.host], self.timeout)
            .await?
            .require_success(PING)?;
        parse_ping_time(&out.stdout)
            .ok_or_else(|| ProbeError::ParseFailure("no time= in ping output".to_string()))
    }
}

/// First `time=` value in ping output, in milliseconds.
fn parse_ping_time(stdout: &str) -> Option<f64> {
    let (_, rest) = stdout.split_once("time=")?;
    let token = rest.split_whitespace().next()?;
    token.trim_end_matches("ms").parse::<f64>().ok()
}

/// Address on the overlay network: the overlay CLI first, then the
/// interface's address table.
pub struct OverlayProbe {
    cli: String,
    ip_command: String,
    interface: String,
    timeout: Duration,
    fallback_timeout: Duration,
}

impl OverlayProbe {
    pub fn new(cfg: &NetworkConfig, timeouts: &TimeoutsConfig) -> Self {
        Self {
            cli: cfg.overlay_cli.clone(),
            ip_command: cfg.ip_command.clone(),
            interface: cfg.overlay_interface.clone(),
            timeout: Duration::from_millis(timeouts.overlay_ms),
            fallback_timeout: Duration::from_millis(timeouts.overlay_fallback_ms),
        }
    }

    async fn from_cli(&self) -> Result<Option<String>, ProbeError> {
        let out = run_command(&self.cli, &["ip", "-4"], self.timeout).await?;
        let addr = out.stdout.lines().next().unwrap_or("").trim();
        if out.success && !addr.is_empty() {
            Ok(Some(addr.to_string()))
        } else {
            Ok(None)
        }
    }

    async fn from_interface(&self) -> Result<OverlayStatus, ProbeError> {
        let out = run_command(
            &self.ip_command,
            &["addr", "show", &self.interface],
            self.fallback_timeout,
        )
        .await?;
        if !out.success {
            return Ok(OverlayStatus::NotConnected);
        }
        Ok(parse_inet_address(&out.stdout)
            .map(|addr| OverlayStatus::Connected(addr.to_string()))
            .unwrap_or(OverlayStatus::NotConnected))
    }
}

#[async_trait]
impl Probe for OverlayProbe {
    type Output = OverlayStatus;

    fn name(&self) -> &str {
        "overlay"
    }

    fn timeout(&self) -> Duration {
        self.timeout + self.fallback_timeout
    }

    async fn invoke(&self) -> Result<OverlayStatus, ProbeError> {
        let primary = match self.from_cli().await {
            Ok(Some(addr)) => return Ok(OverlayStatus::Connected(addr)),
            other => other,
        };
        if let Err(err) = &primary {
            debug!(cli = %self.cli, error = %err, "overlay cli lookup failed");
        }

        let fallback = self.from_interface().await;
        if let Err(err) = &fallback {
            debug!(interface = %self.interface, error = %err, "interface lookup failed");
        }
        settle_overlay(primary, fallback)
    }
}

/// Combines the CLI lookup with the interface fallback. Only when neither
/// method could run at all is the status an error.
fn settle_overlay(
    primary: Result<Option<String>, ProbeError>,
    fallback: Result<OverlayStatus, ProbeError>,
) -> Result<OverlayStatus, ProbeError> {
    match (primary, fallback) {
        (Ok(Some(addr)), _) => Ok(OverlayStatus::Connected(addr)),
        (_, Ok(status)) => Ok(status),
        (Err(_), Err(err)) => Err(err),
        (Ok(None), Err(_)) => Ok(OverlayStatus::NotConnected),
    }
}

/// First `inet a.b.c.d` address in `ip addr show` output.
fn parse_inet_address(stdout: &str) -> Option<Ipv4Addr> {
    stdout.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("inet ")?;
        let cidr = rest.split_whitespace().next()?;
        let addr = cidr.split('/').next()?;
        addr.parse::<Ipv4Addr>().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_OUT: &str = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.\n\
        64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=14.7 ms\n\
        \n--- 1.1.1.1 ping statistics ---\n\
        1 packets transmitted, 1 received, 0% packet loss, time 0ms\n\
        rtt min/avg/max/mdev = 14.712/14.712/14.712/0.000 ms\n";

    const IP_ADDR_OUT: &str = "5: tailscale0: <POINTOPOINT,MULTICAST,NOARP,UP,LOWER_UP> mtu 1280\n\
        link/none\n\
        inet 100.101.102.103/32 scope global tailscale0\n\
           valid_lft forever preferred_lft forever\n\
        inet6 fd7a:115c:a1e0::1/128 scope global\n";

    #[test]
    fn ping_time_is_parsed() {
        assert_eq!(parse_ping_time(PING_OUT), Some(14.7));
        assert_eq!(parse_ping_time("64 bytes: time=0.9ms"), Some(0.9));
        assert_eq!(parse_ping_time("no reply"), None);
        assert_eq!(parse_ping_time("time=abc ms"), None);
    }

    #[test]
    fn inet_address_is_parsed() {
        assert_eq!(
            parse_inet_address(IP_ADDR_OUT),
            Some(Ipv4Addr::new(100, 101, 102, 103))
        );
        assert_eq!(parse_inet_address("link/none\n"), None);
    }

    fn missing(what: &str) -> ProbeError {
        ProbeError::NotFound(what.to_string())
    }

    #[test]
    fn overlay_cli_address_wins() {
        assert_eq!(
            settle_overlay(Ok(Some("100.64.0.7".to_string())), Err(missing("ip"))),
            Ok(OverlayStatus::Connected("100.64.0.7".to_string()))
        );
    }

    #[test]
    fn overlay_falls_back_to_interface() {
        let connected = OverlayStatus::Connected("100.101.102.103".to_string());
        assert_eq!(
            settle_overlay(Ok(None), Ok(connected.clone())),
            Ok(connected.clone())
        );
        assert_eq!(
            settle_overlay(Err(missing("tailscale")), Ok(connected.clone())),
            Ok(connected)
        );
        assert_eq!(
            settle_overlay(Err(missing("tailscale")), Ok(OverlayStatus::NotConnected)),
            Ok(OverlayStatus::NotConnected)
        );
    }

    #[test]
    fn overlay_soft_miss_with_failing_fallback_is_not_connected() {
        assert_eq!(
            settle_overlay(Ok(None), Err(ProbeError::Timeout(Duration::from_secs(2)))),
            Ok(OverlayStatus::NotConnected)
        );
    }

    #[test]
    fn overlay_is_an_error_when_both_methods_fail() {
        assert_eq!(
            settle_overlay(Err(missing("tailscale")), Err(missing("ip"))),
            Err(missing("ip"))
        );
    }

    #[tokio::test]
    async fn overlay_without_either_program_is_an_error() {
        let cfg = NetworkConfig {
            overlay_cli: "hostdash-no-such-overlay-cli".to_string(),
            ip_command: "hostdash-no-such-ip".to_string(),
            ..NetworkConfig::default()
        };
        let probe = OverlayProbe::new(&cfg, &TimeoutsConfig::default());
        assert_eq!(
            probe.invoke().await,
            Err(missing("hostdash-no-such-ip"))
        );
    }
}
