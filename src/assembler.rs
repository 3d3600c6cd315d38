use crate::cache::StalenessCache;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::probes::adblock::AdBlockProbe;
use crate::probes::directories::DirectorySizeProbe;
use crate::probes::network::{LatencyProbe, OverlayProbe, PublicIpProbe};
use crate::probes::resources::{HostUptimeProbe, ResourceProbe};
use crate::probes::services::ServiceProbe;
use crate::probes::{run_bounded, Probe};
use crate::snapshot::{
    AdBlockCounts, AdBlockStats, DirectoryBreakdown, DirectoryUsageEntry, NetworkInfo,
    OverlayStatus, PublicAddress, ResourceSnapshot, ServiceState, Snapshot,
};
use crate::trend::TrendRecorder;
use chrono::{DateTime, Local};
use futures::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub type BoxedProbe<T> = Box<dyn Probe<Output = T>>;

/// Every data source the assembler polls per request.
pub struct Probes {
    pub resources: BoxedProbe<ResourceSnapshot>,
    pub uptime: BoxedProbe<Duration>,
    pub services: Vec<BoxedProbe<ServiceState>>,
    pub adblock: BoxedProbe<AdBlockCounts>,
    pub public_ip: BoxedProbe<PublicAddress>,
    pub latency: BoxedProbe<f64>,
    pub overlay: BoxedProbe<OverlayStatus>,
    pub directories: Vec<BoxedProbe<DirectoryUsageEntry>>,
}

impl Probes {
    pub fn from_config(cfg: &Config, client: Client) -> Self {
        let t = &cfg.timeouts;
        Self {
            resources: Box::new(ResourceProbe::new(&cfg.resources, t)),
            uptime: Box::new(HostUptimeProbe::new(t)),
            services: cfg
                .services
                .iter()
                .map(|name| Box::new(ServiceProbe::new(name, t)) as BoxedProbe<ServiceState>)
                .collect(),
            adblock: Box::new(AdBlockProbe::new(&cfg.adblock, t)),
            public_ip: Box::new(PublicIpProbe::new(client, &cfg.network, t)),
            latency: Box::new(LatencyProbe::new(&cfg.network, t)),
            overlay: Box::new(OverlayProbe::new(&cfg.network, t)),
            directories: cfg
                .directories
                .iter()
                .map(|dir| {
                    Box::new(DirectorySizeProbe::new(dir, t)) as BoxedProbe<DirectoryUsageEntry>
                })
                .collect(),
        }
    }
}

/// Builds one `Snapshot` per call. Holds no state of its own beyond shared
/// handles to the trend recorder and the breakdown cache.
pub struct Assembler {
    probes: Probes,
    trend: Arc<TrendRecorder>,
    breakdown: Arc<StalenessCache<DirectoryBreakdown>>,
    metrics: Arc<Metrics>,
}

impl Assembler {
    pub fn new(
        probes: Probes,
        trend: Arc<TrendRecorder>,
        breakdown: Arc<StalenessCache<DirectoryBreakdown>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            probes,
            trend,
            breakdown,
            metrics,
        }
    }

    pub async fn assemble(&self, now: DateTime<Local>) -> Snapshot {
        let now_unix = now.timestamp();

        let (system, uptime, services, adblock, public_ip, latency_ms, overlay, disk_breakdown) = tokio::join!(
            self.probe(self.probes.resources.as_ref()),
            self.probe(self.probes.uptime.as_ref()),
            self.services(),
            self.probe(self.probes.adblock.as_ref()),
            self.probe(self.probes.public_ip.as_ref()),
            self.probe(self.probes.latency.as_ref()),
            self.probe(self.probes.overlay.as_ref()),
            self.disk_breakdown(now_unix),
        );

        if let Some(system) = &system {
            if self.trend.observe(system.cpu_percent, now_unix) {
                debug!(cpu_percent = system.cpu_percent, "cpu trend sample recorded");
            }
        }

        Snapshot {
            system,
            services,
            adblock: adblock
                .map(AdBlockStats::from_counts)
                .unwrap_or(AdBlockStats::Unavailable),
            network: NetworkInfo {
                public_ip: public_ip.unwrap_or(PublicAddress::Unknown),
                latency_ms,
                overlay: overlay.unwrap_or(OverlayStatus::Unknown),
            },
            uptime,
            cpu_trend: self.trend.samples(),
            disk_breakdown,
            generated_at: now,
        }
    }

    /// Cached directory breakdown, recomputed once the TTL has passed.
    pub async fn disk_breakdown(&self, now_unix: i64) -> DirectoryBreakdown {
        let breakdown = self
            .breakdown
            .get(now_unix, || self.compute_breakdown())
            .await;
        if let Some(age) = self.breakdown.age(now_unix).await {
            self.metrics.set_breakdown_age(age);
        }
        breakdown
    }

    async fn compute_breakdown(&self) -> DirectoryBreakdown {
        let started = std::time::Instant::now();
        let results = join_all(
            self.probes
                .directories
                .iter()
                .map(|probe| self.probe(probe.as_ref())),
        )
        .await;

        let mut entries: DirectoryBreakdown = results.into_iter().flatten().collect();
        entries.sort_by(|a, b| b.size_mb.total_cmp(&a.size_mb));
        debug!(
            entries = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "directory breakdown computed"
        );
        entries
    }

    async fn services(&self) -> Vec<ServiceState> {
        join_all(
            self.probes
                .services
                .iter()
                .map(|probe| self.service(probe.as_ref())),
        )
        .await
    }

    async fn service(&self, probe: &dyn Probe<Output = ServiceState>) -> ServiceState {
        self.probe(probe)
            .await
            .unwrap_or_else(|| ServiceState::inactive(probe.name()))
    }

    /// Runs one probe within its timeout; failures are logged, counted and
    /// collapsed to `None`.
    async fn probe<P>(&self, probe: &P) -> Option<P::Output>
    where
        P: Probe + ?Sized,
    {
        match run_bounded(probe).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(probe = %probe.name(), error = %err, "probe failed");
                self.metrics.inc_probe_error(probe.name());
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::probes::ProbeError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct Fixed<T> {
        name: String,
        result: Result<T, ProbeError>,
        calls: Arc<AtomicUsize>,
    }

    impl<T> Fixed<T> {
        pub(crate) fn ok(name: &str, value: T) -> Self {
            Self {
                name: name.to_string(),
                result: Ok(value),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn err(name: &str, err: ProbeError) -> Self {
            Self {
                name: name.to_string(),
                result: Err(err),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> Probe for Fixed<T> {
        type Output = T;

        fn name(&self) -> &str {
            &self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn invoke(&self) -> Result<T, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Hanging;

    #[async_trait]
    impl Probe for Hanging {
        type Output = f64;

        fn name(&self) -> &str {
            "latency"
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn invoke(&self) -> Result<f64, ProbeError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(1.0)
        }
    }

    pub(crate) fn resources() -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_percent: 12.5,
            ram_used_mb: 512.0,
            ram_free_mb: 400.0,
            ram_total_mb: 912.0,
            ram_percent: 56.1,
            cpu_temp: Some(48.3),
            disk_used_gb: 10.25,
            disk_total_gb: 29.5,
            disk_percent: 34.7,
        }
    }

    fn entry(path: &str, size_mb: f64) -> DirectoryUsageEntry {
        DirectoryUsageEntry {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            size_mb,
            size_gb: size_mb / 1024.0,
        }
    }

    fn active(name: &str) -> BoxedProbe<ServiceState> {
        Box::new(Fixed::ok(
            name,
            ServiceState {
                name: name.to_string(),
                active: true,
                uptime: Some("2h 5m".to_string()),
            },
        ))
    }

    /// All sources healthy except ad-block (unavailable) and network (failing).
    pub(crate) fn degraded_probes() -> Probes {
        Probes {
            resources: Box::new(Fixed::ok("resources", resources())),
            uptime: Box::new(Fixed::ok("uptime", Duration::from_secs(90_061))),
            services: vec![active("nginx"), active("pihole-FTL")],
            adblock: Box::new(Fixed::err(
                "adblock",
                ProbeError::Unavailable("ad-block database".to_string()),
            )),
            public_ip: Box::new(Fixed::err(
                "public_ip",
                ProbeError::Unavailable("connect".to_string()),
            )),
            latency: Box::new(Fixed::err(
                "latency",
                ProbeError::NotFound("ping".to_string()),
            )),
            overlay: Box::new(Fixed::err(
                "overlay",
                ProbeError::Timeout(Duration::from_secs(3)),
            )),
            directories: vec![],
        }
    }

    pub(crate) fn assembler(probes: Probes) -> Assembler {
        assembler_with(probes, Metrics::new().expect("metrics init"))
    }

    /// Assembler reporting into a registry the caller also serves.
    pub(crate) fn assembler_with(probes: Probes, metrics: Arc<Metrics>) -> Assembler {
        Assembler::new(
            probes,
            Arc::new(TrendRecorder::new(60, 60)),
            Arc::new(StalenessCache::new(43_200)),
            metrics,
        )
    }

    fn at(secs: i64) -> DateTime<Local> {
        Local
            .timestamp_opt(secs, 0)
            .single()
            .expect("valid timestamp")
    }

    #[tokio::test]
    async fn failing_sources_degrade_only_their_fields() {
        let snapshot = assembler(degraded_probes())
            .assemble(at(1_700_000_000))
            .await;

        assert_eq!(snapshot.system, Some(resources()));
        assert_eq!(snapshot.services.len(), 2);
        assert!(snapshot.services.iter().all(|s| s.active));
        assert_eq!(snapshot.adblock, AdBlockStats::Unavailable);
        assert_eq!(snapshot.network.public_ip, PublicAddress::Unknown);
        assert_eq!(snapshot.network.latency_ms, None);
        assert_eq!(snapshot.network.overlay, OverlayStatus::Unknown);
        assert_eq!(snapshot.uptime, Some(Duration::from_secs(90_061)));
    }

    #[tokio::test]
    async fn one_failing_service_keeps_the_rest() {
        let mut probes = degraded_probes();
        probes.services = vec![
            active("nginx"),
            Box::new(Fixed::err(
                "cloudflared",
                ProbeError::Timeout(Duration::from_secs(2)),
            )),
            active("tailscaled"),
        ];
        probes.public_ip = Box::new(Fixed::ok(
            "public_ip",
            PublicAddress::Masked("203.0.xxx.xxx".to_string()),
        ));
        probes.latency = Box::new(Fixed::ok("latency", 14.7));
        probes.overlay = Box::new(Fixed::ok(
            "overlay",
            OverlayStatus::Connected("100.64.0.1".to_string()),
        ));

        let snapshot = assembler(probes).assemble(at(1_700_000_000)).await;

        assert!(snapshot.system.is_some());
        let names: Vec<&str> = snapshot.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["nginx", "cloudflared", "tailscaled"]);
        assert_eq!(snapshot.services[1], ServiceState::inactive("cloudflared"));
        assert!(snapshot.services[0].active && snapshot.services[2].active);
        assert_eq!(snapshot.network.latency_ms, Some(14.7));
        assert_eq!(
            snapshot.network.overlay,
            OverlayStatus::Connected("100.64.0.1".to_string())
        );
    }

    #[tokio::test]
    async fn hanging_probe_is_cut_off() {
        let mut probes = degraded_probes();
        probes.latency = Box::new(Hanging);
        let started = std::time::Instant::now();
        let snapshot = assembler(probes).assemble(at(0)).await;
        assert_eq!(snapshot.network.latency_ms, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn breakdown_is_sorted_cached_and_skips_missing() {
        let small = Fixed::ok("/var/log", entry("/var/log", 120.0));
        let calls = small.calls.clone();
        let mut probes = degraded_probes();
        probes.directories = vec![
            Box::new(small),
            Box::new(Fixed::err(
                "/srv/gone",
                ProbeError::NotFound("/srv/gone".to_string()),
            )),
            Box::new(Fixed::ok("/home", entry("/home", 4096.0))),
            Box::new(Fixed::ok("/opt", entry("/opt", 800.0))),
        ];
        let cached = assembler(probes);

        let first = cached.assemble(at(1_000)).await;
        let sizes: Vec<f64> = first.disk_breakdown.iter().map(|e| e.size_mb).collect();
        assert_eq!(sizes, vec![4096.0, 800.0, 120.0]);
        assert!(first.disk_breakdown.iter().all(|e| e.path != "/srv/gone"));

        cached.assemble(at(1_000 + 3600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cached.assemble(at(1_000 + 43_200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn trend_follows_resource_probe() {
        let healthy = assembler(degraded_probes());
        healthy.assemble(at(0)).await;
        healthy.assemble(at(10)).await;
        let snapshot = healthy.assemble(at(60)).await;
        let timestamps: Vec<i64> = snapshot.cpu_trend.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![0, 60]);
        assert!(snapshot.cpu_trend.iter().all(|s| s.value == 12.5));

        let mut probes = degraded_probes();
        probes.resources = Box::new(Fixed::err(
            "resources",
            ProbeError::PermissionDenied("/proc".to_string()),
        ));
        let snapshot = assembler(probes).assemble(at(0)).await;
        assert!(snapshot.system.is_none());
        assert!(snapshot.cpu_trend.is_empty());
    }
}
