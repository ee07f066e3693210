use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerMetrics {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
    /// Frames with an api key the broker does not answer.
    pub dropped_requests: u64,
    pub malformed_frames: u64,
    pub uptime_seconds: u64,
    pub start_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMetrics {
    pub api_key: i16,
    pub name: String,
    pub requests: u64,
    /// Responses carrying a non-zero error code.
    pub error_responses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllMetrics {
    pub broker: BrokerMetrics,
    pub apis: HashMap<i16, ApiMetrics>,
}

pub struct MetricsCollector {
    pub broker_metrics: Arc<RwLock<BrokerMetrics>>,
    pub api_metrics: Arc<RwLock<HashMap<i16, ApiMetrics>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            broker_metrics: Arc::new(RwLock::new(BrokerMetrics {
                start_time: now_secs(),
                ..BrokerMetrics::default()
            })),
            api_metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn increment_connections(&self) {
        let mut metrics = self.broker_metrics.write().await;
        metrics.total_connections += 1;
        metrics.active_connections += 1;
    }

    pub async fn decrement_connections(&self) {
        let mut metrics = self.broker_metrics.write().await;
        if metrics.active_connections > 0 {
            metrics.active_connections -= 1;
        }
    }

    pub async fn increment_dropped_requests(&self) {
        let mut metrics = self.broker_metrics.write().await;
        metrics.total_requests += 1;
        metrics.dropped_requests += 1;
    }

    pub async fn increment_malformed_frames(&self) {
        let mut metrics = self.broker_metrics.write().await;
        metrics.malformed_frames += 1;
    }

    pub async fn record_request(&self, api_key: i16, name: &str, error_code: i16) {
        self.broker_metrics.write().await.total_requests += 1;

        let mut apis = self.api_metrics.write().await;
        let entry = apis.entry(api_key).or_insert_with(|| ApiMetrics {
            api_key,
            name: name.to_string(),
            requests: 0,
            error_responses: 0,
        });
        entry.requests += 1;
        if error_code != 0 {
            entry.error_responses += 1;
        }
    }

    pub async fn get_all_metrics(&self) -> AllMetrics {
        let mut broker = self.broker_metrics.write().await;
        broker.uptime_seconds = now_secs().saturating_sub(broker.start_time);
        let broker = broker.clone();

        AllMetrics {
            broker,
            apis: self.api_metrics.read().await.clone(),
        }
    }
}
