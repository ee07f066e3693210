use std::env;
use tracing::warn;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9092";
pub const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub listen_addr: String,
    /// `None` disables the HTTP dashboard.
    pub dashboard_addr: Option<String>,
    /// Largest request frame accepted, not counting the 4-byte length prefix.
    pub max_frame_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            dashboard_addr: Some(DEFAULT_DASHBOARD_ADDR.to_string()),
            max_frame_size: 1024 * 1024, // 1 MiB
        }
    }
}

impl BrokerConfig {
    /// Defaults overridden by `MINIKA_LISTEN_ADDR`, `MINIKA_DASHBOARD_ADDR`
    /// and `MINIKA_MAX_FRAME_SIZE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("MINIKA_LISTEN_ADDR").filter(|a| !a.trim().is_empty()) {
            config.listen_addr = addr.trim().to_string();
        }

        if let Some(addr) = lookup("MINIKA_DASHBOARD_ADDR") {
            let addr = addr.trim();
            config.dashboard_addr = match addr {
                "" | "off" | "none" => None,
                _ => Some(addr.to_string()),
            };
        }

        if let Some(raw) = lookup("MINIKA_MAX_FRAME_SIZE") {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => config.max_frame_size = size,
                _ => warn!(
                    "Ignoring invalid MINIKA_MAX_FRAME_SIZE={:?}, using {}",
                    raw, config.max_frame_size
                ),
            }
        }

        config
    }
}
