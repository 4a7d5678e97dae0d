//! Client configuration

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address, `host:port`.
    pub address: String,
    /// Optional label sent with an `i` frame right after the preamble.
    pub client_id: Option<String>,
    pub connect_timeout: Duration,
    /// How long to wait for a bind or close acknowledgement.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        ClientConfig {
            address: address.into(),
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            address: "127.0.0.1:4150".to_string(),
            client_id: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}
