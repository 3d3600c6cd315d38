use crate::assembler::Assembler;
use crate::metrics::Metrics;
use crate::snapshot::{
    format_host_uptime, AdBlockStats, DirectoryUsageEntry, OverlayStatus, PublicAddress,
    ResourceSnapshot, Snapshot, TrendSample,
};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

const UNKNOWN: &str = "Unknown";
const NOT_CONNECTED: &str = "Not connected";
const NOT_AVAILABLE: &str = "N/A";

#[derive(Clone)]
pub struct HttpAppState {
    pub assembler: Arc<Assembler>,
    pub metrics: Arc<Metrics>,
}

/// A count, or the `"N/A"` sentinel when the source was unavailable.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reading<T> {
    Value(T),
    Missing(&'static str),
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiService {
    pub active: bool,
    pub uptime: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiAdBlock {
    pub ads_blocked_today: Reading<u64>,
    pub dns_queries_today: Reading<u64>,
    pub ads_percentage_today: Reading<f64>,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiNetwork {
    pub public_ip: String,
    pub latency_ms: Option<f64>,
    pub tailscale_ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiSnapshot {
    pub system: Option<ResourceSnapshot>,
    pub services: BTreeMap<String, ApiService>,
    pub pihole: ApiAdBlock,
    pub network: ApiNetwork,
    pub uptime: String,
    pub cpu_trend: Vec<TrendSample>,
    pub disk_breakdown: Vec<DirectoryUsageEntry>,
    pub timestamp: String,
}

impl From<&AdBlockStats> for ApiAdBlock {
    fn from(value: &AdBlockStats) -> Self {
        match *value {
            AdBlockStats::Available {
                queries,
                blocked,
                percentage,
            } => Self {
                ads_blocked_today: Reading::Value(blocked),
                dns_queries_today: Reading::Value(queries),
                ads_percentage_today: Reading::Value(percentage),
                status: "enabled",
            },
            AdBlockStats::Unavailable => Self {
                ads_blocked_today: Reading::Missing(NOT_AVAILABLE),
                dns_queries_today: Reading::Missing(NOT_AVAILABLE),
                ads_percentage_today: Reading::Missing(NOT_AVAILABLE),
                status: "unavailable",
            },
        }
    }
}

impl From<&Snapshot> for ApiSnapshot {
    fn from(value: &Snapshot) -> Self {
        Self {
            system: value.system.clone(),
            services: value
                .services
                .iter()
                .map(|s| {
                    (
                        s.name.clone(),
                        ApiService {
                            active: s.active,
                            uptime: s.uptime.clone(),
                        },
                    )
                })
                .collect(),
            pihole: ApiAdBlock::from(&value.adblock),
            network: ApiNetwork {
                public_ip: match &value.network.public_ip {
                    PublicAddress::Masked(ip) => ip.clone(),
                    PublicAddress::Unknown => UNKNOWN.to_string(),
                },
                latency_ms: value.network.latency_ms,
                tailscale_ip: match &value.network.overlay {
                    OverlayStatus::Connected(ip) => ip.clone(),
                    OverlayStatus::NotConnected => NOT_CONNECTED.to_string(),
                    OverlayStatus::Unknown => UNKNOWN.to_string(),
                },
            },
            uptime: value
                .uptime
                .map(format_host_uptime)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            cpu_trend: value.cpu_trend.clone(),
            disk_breakdown: value.disk_breakdown.clone(),
            timestamp: value.generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self, "snapshot request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub fn build_router(assembler: Arc<Assembler>, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(HttpAppState { assembler, metrics })
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn stats_handler(
    State(state): State<HttpAppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.assembler.assemble(Local::now()).await;
    state.metrics.update_from_snapshot(&snapshot);
    let body = serde_json::to_value(ApiSnapshot::from(&snapshot))?;
    Ok(Json(body))
}
