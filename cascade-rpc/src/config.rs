//! Endpoint runtime configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the endpoint runtime of a cluster member
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Number of cooperative workers servicing endpoint requests
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Times an idle worker yields before it starts parking
    #[serde(default = "default_spin_yields")]
    pub spin_yields: u32,

    /// Minimum park time for an idle worker, in microseconds
    #[serde(default = "default_min_park_us")]
    pub min_park_us: u64,

    /// Maximum park time for an idle worker, in microseconds
    #[serde(default = "default_max_park_us")]
    pub max_park_us: u64,
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_spin_yields() -> u32 {
    64
}

fn default_min_park_us() -> u64 {
    50
}

fn default_max_park_us() -> u64 {
    1_000
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            spin_yields: default_spin_yields(),
            min_park_us: default_min_park_us(),
            max_park_us: default_max_park_us(),
        }
    }
}

impl EndpointConfig {
    /// Configuration with an explicit worker count
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    /// Get minimum idle park time as Duration
    pub fn min_park(&self) -> Duration {
        Duration::from_micros(self.min_park_us)
    }

    /// Get maximum idle park time as Duration
    pub fn max_park(&self) -> Duration {
        Duration::from_micros(self.max_park_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EndpointConfig::default();
        assert!(config.worker_count >= 1);
        assert!(config.min_park() <= config.max_park());
    }

    #[test]
    fn test_with_workers() {
        let config = EndpointConfig::with_workers(2);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: EndpointConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.spin_yields, 64);
        assert_eq!(config.min_park_us, 50);
    }
}
