use minika::{dashboard, metrics::MetricsCollector, BrokerConfig, KafkaBroker};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(not(target_env = "msvc"), feature = "jemalloc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(all(not(target_env = "msvc"), feature = "jemalloc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting minika - ApiVersions / DescribeTopicPartitions broker");

    let config = BrokerConfig::from_env();
    let metrics = Arc::new(MetricsCollector::new());
    let broker = KafkaBroker::new_with_metrics(config, metrics.clone());

    if let Some(addr) = broker.config().dashboard_addr.clone() {
        let registry = broker.registry.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::start_dashboard(&addr, metrics, registry).await {
                error!("Dashboard on {} stopped: {}", addr, e);
            }
        });
    }

    // A bind failure ends the process here.
    broker.run().await?;

    Ok(())
}
