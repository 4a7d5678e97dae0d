//! Broker-level counters
//!
//! Lock-free atomic counters with relaxed ordering; incrementing from the hot
//! session paths costs one uncontended atomic add. `snapshot()` produces a
//! serializable view for the HTTP surface.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct MetricsRegistry {
    pub broker: BrokerMetrics,
}

#[derive(Default)]
pub struct BrokerMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    messages_published: AtomicU64,
}

impl BrokerMetrics {
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializable snapshot of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub active_connections: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub messages_published: u64,
}

impl MetricsRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(MetricsRegistry {
            broker: BrokerMetrics::default(),
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let opened = self.broker.connections_opened.load(Ordering::Relaxed);
        let closed = self.broker.connections_closed.load(Ordering::Relaxed);
        MetricsSnapshot {
            active_connections: opened.saturating_sub(closed),
            connections_opened: opened,
            connections_closed: closed,
            frames_received: self.broker.frames_received.load(Ordering::Relaxed),
            frames_sent: self.broker.frames_sent.load(Ordering::Relaxed),
            messages_published: self.broker.messages_published.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = MetricsRegistry::new();
        metrics.broker.connection_opened();
        metrics.broker.connection_opened();
        metrics.broker.connection_closed();
        metrics.broker.frame_received();
        metrics.broker.message_published();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.connections_opened, 2);
        assert_eq!(snapshot.frames_received, 1);
        assert_eq!(snapshot.messages_published, 1);
    }
}
