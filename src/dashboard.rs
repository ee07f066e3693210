use crate::api_registry::ApiRegistry;
use crate::metrics::{AllMetrics, MetricsCollector};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tower_http::cors::CorsLayer;
use tracing::info;

#[derive(Clone)]
struct DashboardState {
    metrics: Arc<MetricsCollector>,
    registry: Arc<ApiRegistry>,
}

pub fn router(metrics: Arc<MetricsCollector>, registry: Arc<ApiRegistry>) -> Router {
    let state = DashboardState { metrics, registry };

    Router::new()
        .route("/api/metrics", get(metrics_handler))
        .route("/api/metrics/poll", get(metrics_long_poll_handler))
        .route("/api/versions", get(versions_handler))
        .route("/api/memory-stats", get(memory_stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_dashboard(
    addr: &str,
    metrics: Arc<MetricsCollector>,
    registry: Arc<ApiRegistry>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard available at http://{}", listener.local_addr()?);

    axum::serve(listener, router(metrics, registry)).await
}

async fn metrics_handler(
    State(state): State<DashboardState>,
) -> Result<Json<AllMetrics>, StatusCode> {
    Ok(Json(state.metrics.get_all_metrics().await))
}

async fn versions_handler(State(state): State<DashboardState>) -> Json<ApiRegistry> {
    Json(state.registry.as_ref().clone())
}

#[derive(Deserialize)]
struct LongPollQuery {
    last_update: Option<u64>,
}

#[derive(Serialize)]
struct MetricsWithTimestamp {
    metrics: AllMetrics,
    timestamp: u64,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

async fn metrics_long_poll_handler(
    State(state): State<DashboardState>,
    Query(query): Query<LongPollQuery>,
) -> Result<Json<MetricsWithTimestamp>, StatusCode> {
    let max_wait = Duration::from_secs(30);
    let poll_interval = Duration::from_millis(100);

    let result = timeout(max_wait, async {
        // First request, return immediately
        if query.last_update.is_none() {
            return state.metrics.get_all_metrics().await;
        }

        let mut last_metrics = state.metrics.get_all_metrics().await;
        loop {
            sleep(poll_interval).await;
            let current_metrics = state.metrics.get_all_metrics().await;
            if has_metrics_changed(&last_metrics, &current_metrics) {
                return current_metrics;
            }
            last_metrics = current_metrics;
        }
    })
    .await;

    let metrics = match result {
        Ok(metrics) => metrics,
        Err(_) => state.metrics.get_all_metrics().await,
    };

    Ok(Json(MetricsWithTimestamp {
        metrics,
        timestamp: now_millis(),
    }))
}

pub fn has_metrics_changed(old: &AllMetrics, new: &AllMetrics) -> bool {
    old.broker.active_connections != new.broker.active_connections
        || old.broker.total_connections != new.broker.total_connections
        || old.broker.total_requests != new.broker.total_requests
        || old.broker.malformed_frames != new.broker.malformed_frames
        || old.apis.len() != new.apis.len()
}

#[derive(Serialize, Default)]
struct MemoryStats {
    allocated_mb: f64,
    active_mb: f64,
    mapped_mb: f64,
    metadata_mb: f64,
    retained_mb: f64,
}

#[cfg(all(not(target_env = "msvc"), feature = "jemalloc"))]
fn jemalloc_stat_mb(name: &'static [u8]) -> f64 {
    let mut value: usize = 0;
    let mut sz = std::mem::size_of::<usize>();
    // SAFETY: `name` is NUL-terminated and `value`/`sz` describe a usize out-parameter.
    let rc = unsafe {
        tikv_jemalloc_sys::mallctl(
            name.as_ptr() as *const _,
            &mut value as *mut _ as *mut _,
            &mut sz as *mut _,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return 0.0;
    }
    value as f64 / 1024.0 / 1024.0
}

async fn memory_stats_handler() -> Json<MemoryStats> {
    #[allow(unused_mut)]
    let mut stats = MemoryStats::default();

    #[cfg(all(not(target_env = "msvc"), feature = "jemalloc"))]
    {
        stats.allocated_mb = jemalloc_stat_mb(b"stats.allocated\0");
        stats.active_mb = jemalloc_stat_mb(b"stats.active\0");
        stats.mapped_mb = jemalloc_stat_mb(b"stats.mapped\0");
        stats.metadata_mb = jemalloc_stat_mb(b"stats.metadata\0");
        stats.retained_mb = jemalloc_stat_mb(b"stats.retained\0");
    }

    Json(stats)
}
