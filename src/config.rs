//! Broker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};

/// Configuration for the teleport broker.
///
/// Read at construction and swappable at runtime via
/// [`RequestBroker::reconfigure`](crate::broker::RequestBroker::reconfigure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How long a pending request stays valid, in milliseconds
    pub request_expiration_ms: u64,

    /// Minimum time between two relocations of the same actor, in milliseconds.
    /// Zero disables the cooldown.
    pub cooldown_ms: u64,

    /// Whether the destination is checked with the safety checker before moving
    pub safety_check_enabled: bool,

    /// How often the sweeper purges expired requests, in milliseconds.
    /// Changes take effect on the next `start()`.
    pub sweep_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_expiration_ms: 60_000, // 1 minute
            cooldown_ms: 30_000,           // 30 seconds
            safety_check_enabled: true,
            sweep_interval_ms: 30_000, // 30 seconds
        }
    }
}

impl BrokerConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BrokerConfig = serde_json::from_str(json)
            .map_err(|e| BrokerError::InvalidConfig(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_expiration_ms == 0 {
            return Err(BrokerError::InvalidConfig(
                "request_expiration_ms must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(BrokerError::InvalidConfig(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_expiration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.request_expiration_ms as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
