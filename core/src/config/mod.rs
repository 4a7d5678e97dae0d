pub mod settings;

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Heartbeat cadence for active subscriptions, in milliseconds.
    pub noop_interval_ms: u64,
    /// Buffered capacity for queues and per-subscriber topic endpoints.
    pub default_capacity: usize,
    pub max_connections: usize,
    /// Preferred frame-reader buffer size per connection.
    pub buffer_size: usize,

    // HTTP façade configuration
    pub http_enabled: bool,
    pub http_port: u16,
    /// Optional path prefix in front of the `/mq/...` routes.
    pub http_prefix: String,
    /// Where to send requests that miss every route; `None` means plain 404.
    pub http_redirect_url: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4150,
            noop_interval_ms: 1000,
            default_capacity: 256,
            max_connections: 1000,
            buffer_size: 256,

            http_enabled: false,
            http_port: 4151,
            http_prefix: String::new(),
            http_redirect_url: None,
        }
    }
}

impl BrokerConfig {
    pub fn noop_interval(&self) -> Duration {
        Duration::from_millis(self.noop_interval_ms)
    }

    /// Validate configuration bounds before the server starts.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.noop_interval_ms == 0 {
            return Err("noop_interval_ms must be > 0".to_string());
        }
        if self.default_capacity == 0 {
            return Err("default_capacity must be > 0".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.buffer_size == 0 {
            return Err("buffer_size must be > 0".to_string());
        }
        Ok(())
    }
}
