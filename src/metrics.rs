use crate::snapshot::{AdBlockStats, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

const MIB: f64 = 1024.0 * 1024.0;

pub struct Metrics {
    registry: Registry,
    pub host_cpu_usage_percent: Gauge,
    pub host_ram_used_bytes: Gauge,
    pub host_ram_total_bytes: Gauge,
    pub host_ram_usage_percent: Gauge,
    pub host_disk_usage_percent: Gauge,
    pub host_cpu_temperature_celsius: Gauge,
    pub host_uptime_seconds: Gauge,
    pub host_service_up: GaugeVec,
    pub host_network_latency_ms: Gauge,
    pub host_adblock_queries: Gauge,
    pub host_adblock_blocked: Gauge,
    pub host_directory_size_bytes: GaugeVec,
    pub host_cpu_trend_samples: Gauge,
    pub host_breakdown_age_seconds: Gauge,
    pub snapshot_requests_total: Counter,
    pub probe_errors_total: CounterVec,
    pub last_snapshot_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let host_cpu_usage_percent = Gauge::with_opts(opts!(
            "host_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let host_ram_used_bytes =
            Gauge::with_opts(opts!("host_ram_used_bytes", "Used RAM in bytes"))?;
        let host_ram_total_bytes =
            Gauge::with_opts(opts!("host_ram_total_bytes", "Total RAM in bytes"))?;
        let host_ram_usage_percent =
            Gauge::with_opts(opts!("host_ram_usage_percent", "RAM usage in percent"))?;
        let host_disk_usage_percent = Gauge::with_opts(opts!(
            "host_disk_usage_percent",
            "Root filesystem usage in percent"
        ))?;
        let host_cpu_temperature_celsius = Gauge::with_opts(opts!(
            "host_cpu_temperature_celsius",
            "Thermal zone temperature in Celsius"
        ))?;
        let host_uptime_seconds =
            Gauge::with_opts(opts!("host_uptime_seconds", "Host uptime in seconds"))?;
        let host_service_up = GaugeVec::new(
            opts!("host_service_up", "1 if the service is active"),
            &["service"],
        )?;
        let host_network_latency_ms = Gauge::with_opts(opts!(
            "host_network_latency_ms",
            "Round-trip time to the ping host in milliseconds"
        ))?;
        let host_adblock_queries = Gauge::with_opts(opts!(
            "host_adblock_queries",
            "DNS queries seen in the trailing window"
        ))?;
        let host_adblock_blocked = Gauge::with_opts(opts!(
            "host_adblock_blocked",
            "DNS queries blocked in the trailing window"
        ))?;
        let host_directory_size_bytes = GaugeVec::new(
            opts!(
                "host_directory_size_bytes",
                "Directory size from the cached breakdown"
            ),
            &["path"],
        )?;
        let host_cpu_trend_samples = Gauge::with_opts(opts!(
            "host_cpu_trend_samples",
            "Samples currently held in the CPU trend window"
        ))?;
        let host_breakdown_age_seconds = Gauge::with_opts(opts!(
            "host_breakdown_age_seconds",
            "Age of the cached directory breakdown"
        ))?;
        let snapshot_requests_total = Counter::with_opts(opts!(
            "snapshot_requests_total",
            "Number of assembled snapshots"
        ))?;
        let probe_errors_total = CounterVec::new(
            opts!("probe_errors_total", "Probe failures total by probe"),
            &["probe"],
        )?;
        let last_snapshot_timestamp_seconds = Gauge::with_opts(opts!(
            "last_snapshot_timestamp_seconds",
            "Unix timestamp of the last assembled snapshot"
        ))?;

        register(&registry, &host_cpu_usage_percent)?;
        register(&registry, &host_ram_used_bytes)?;
        register(&registry, &host_ram_total_bytes)?;
        register(&registry, &host_ram_usage_percent)?;
        register(&registry, &host_disk_usage_percent)?;
        register(&registry, &host_cpu_temperature_celsius)?;
        register(&registry, &host_uptime_seconds)?;
        register(&registry, &host_service_up)?;
        register(&registry, &host_network_latency_ms)?;
        register(&registry, &host_adblock_queries)?;
        register(&registry, &host_adblock_blocked)?;
        register(&registry, &host_directory_size_bytes)?;
        register(&registry, &host_cpu_trend_samples)?;
        register(&registry, &host_breakdown_age_seconds)?;
        register(&registry, &snapshot_requests_total)?;
        register(&registry, &probe_errors_total)?;
        register(&registry, &last_snapshot_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            host_cpu_usage_percent,
            host_ram_used_bytes,
            host_ram_total_bytes,
            host_ram_usage_percent,
            host_disk_usage_percent,
            host_cpu_temperature_celsius,
            host_uptime_seconds,
            host_service_up,
            host_network_latency_ms,
            host_adblock_queries,
            host_adblock_blocked,
            host_directory_size_bytes,
            host_cpu_trend_samples,
            host_breakdown_age_seconds,
            snapshot_requests_total,
            probe_errors_total,
            last_snapshot_timestamp_seconds,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot) {
        self.snapshot_requests_total.inc();
        self.last_snapshot_timestamp_seconds
            .set(snapshot.generated_at.timestamp() as f64);

        // A degraded field reads NaN so a failed probe never leaves the last
        // good value looking current.
        let system = snapshot.system.as_ref();
        set_or_nan(&self.host_cpu_usage_percent, system.map(|s| s.cpu_percent));
        set_or_nan(
            &self.host_ram_used_bytes,
            system.map(|s| s.ram_used_mb * MIB),
        );
        set_or_nan(
            &self.host_ram_total_bytes,
            system.map(|s| s.ram_total_mb * MIB),
        );
        set_or_nan(&self.host_ram_usage_percent, system.map(|s| s.ram_percent));
        set_or_nan(&self.host_disk_usage_percent, system.map(|s| s.disk_percent));
        set_or_nan(
            &self.host_cpu_temperature_celsius,
            system.and_then(|s| s.cpu_temp),
        );
        set_or_nan(
            &self.host_uptime_seconds,
            snapshot.uptime.map(|u| u.as_secs() as f64),
        );

        self.host_service_up.reset();
        for service in &snapshot.services {
            self.host_service_up
                .with_label_values(&[&service.name])
                .set(if service.active { 1.0 } else { 0.0 });
        }

        set_or_nan(&self.host_network_latency_ms, snapshot.network.latency_ms);

        let counts = match snapshot.adblock {
            AdBlockStats::Available {
                queries, blocked, ..
            } => Some((queries as f64, blocked as f64)),
            AdBlockStats::Unavailable => None,
        };
        set_or_nan(&self.host_adblock_queries, counts.map(|(q, _)| q));
        set_or_nan(&self.host_adblock_blocked, counts.map(|(_, b)| b));

        self.host_directory_size_bytes.reset();
        for entry in &snapshot.disk_breakdown {
            self.host_directory_size_bytes
                .with_label_values(&[&entry.path])
                .set(entry.size_mb * MIB);
        }

        self.host_cpu_trend_samples
            .set(snapshot.cpu_trend.len() as f64);
    }

    pub fn set_breakdown_age(&self, age_secs: i64) {
        self.host_breakdown_age_seconds.set(age_secs as f64);
    }

    pub fn inc_probe_error(&self, probe: &str) {
        self.probe_errors_total.with_label_values(&[probe]).inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn set_or_nan(gauge: &Gauge, value: Option<f64>) {
    gauge.set(value.unwrap_or(f64::NAN));
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{NetworkInfo, OverlayStatus, PublicAddress, ServiceState};
    use chrono::Local;

    #[test]
    fn snapshot_updates_gauges() {
        let metrics = Metrics::new().expect("metrics init");
        let snapshot = Snapshot {
            system: None,
            services: vec![ServiceState::inactive("nginx")],
            adblock: AdBlockStats::Unavailable,
            network: NetworkInfo {
                public_ip: PublicAddress::Unknown,
                latency_ms: Some(12.5),
                overlay: OverlayStatus::Unknown,
            },
            uptime: None,
            cpu_trend: vec![],
            disk_breakdown: vec![],
            generated_at: Local::now(),
        };
        metrics.update_from_snapshot(&snapshot);
        metrics.inc_probe_error("latency");

        let text = String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8");
        assert!(text.contains("host_service_up{service=\"nginx\"} 0"));
        assert!(text.contains("host_network_latency_ms 12.5"));
        assert!(text.contains("probe_errors_total{probe=\"latency\"} 1"));
        assert!(text.contains("snapshot_requests_total 1"));
        assert!(text.contains("host_adblock_queries NaN"));
        assert!(text.contains("host_cpu_usage_percent NaN"));
    }

    #[test]
    fn failed_source_does_not_keep_stale_reading() {
        let metrics = Metrics::new().expect("metrics init");
        let mut snapshot = Snapshot {
            system: None,
            services: vec![],
            adblock: AdBlockStats::from_counts(crate::snapshot::AdBlockCounts {
                queries: 200,
                blocked: 50,
            }),
            network: NetworkInfo {
                public_ip: PublicAddress::Unknown,
                latency_ms: Some(9.5),
                overlay: OverlayStatus::Unknown,
            },
            uptime: Some(std::time::Duration::from_secs(600)),
            cpu_trend: vec![],
            disk_breakdown: vec![],
            generated_at: Local::now(),
        };
        metrics.update_from_snapshot(&snapshot);
        let text = String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8");
        assert!(text.contains("host_network_latency_ms 9.5"));
        assert!(text.contains("host_adblock_blocked 50"));
        assert!(text.contains("host_uptime_seconds 600"));

        snapshot.network.latency_ms = None;
        snapshot.adblock = AdBlockStats::Unavailable;
        snapshot.uptime = None;
        metrics.update_from_snapshot(&snapshot);
        let text = String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8");
        assert!(text.contains("host_network_latency_ms NaN"));
        assert!(text.contains("host_adblock_blocked NaN"));
        assert!(text.contains("host_uptime_seconds NaN"));
        assert!(!text.contains("host_network_latency_ms 9.5"));
    }
}
