pub mod api_registry;
pub mod broker;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod protocol;

pub use broker::KafkaBroker;
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
