mod assembler;
mod cache;
mod config;
mod http;
mod metrics;
mod probes;
mod snapshot;
mod trend;

use assembler::{Assembler, Probes};
use axum::serve;
use cache::StalenessCache;
use clap::Parser;
use config::Config;
use metrics::Metrics;
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trend::TrendRecorder;

#[derive(Parser, Debug)]
#[command(name = "hostdash")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        services = cfg.services.len(),
        directories = cfg.directories.len(),
        trend_interval_secs = cfg.trend.interval_secs,
        breakdown_ttl_secs = cfg.breakdown.ttl_secs,
        "starting hostdash"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let client = Client::builder()
        .user_agent(concat!("hostdash/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new());

    let trend = Arc::new(TrendRecorder::new(
        cfg.trend.interval_secs,
        cfg.trend.capacity,
    ));
    let breakdown = Arc::new(StalenessCache::new(cfg.breakdown.ttl_secs));
    let assembler = Arc::new(Assembler::new(
        Probes::from_config(&cfg, client),
        trend,
        breakdown,
        metrics.clone(),
    ));

    // Directory scans are slow; compute the first breakdown before anyone asks.
    let warmup_task = {
        let assembler = assembler.clone();
        tokio::spawn(async move {
            let entries = assembler.disk_breakdown(now_unix()).await;
            info!(entries = entries.len(), "initial directory breakdown ready");
        })
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = cfg.listen.clone();
        tokio::spawn(async move {
            let app = http::build_router(assembler, metrics);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind HTTP listener");
                    return;
                }
            };
            info!(%addr, "HTTP server listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);
    warmup_task.abort();
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
