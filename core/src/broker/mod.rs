//! # Broker Registry and Sessions
//!
//! The broker owns the two name-keyed channel maps (queues and topics), the
//! set of live client sessions, and nothing else. Channels are created lazily
//! on first reference and destroyed only by an explicit kill; killing closes
//! the channel outside the map so no registry lock is ever held across a
//! suspension point.
//!
//! - [`server`] - TCP acceptor and server lifecycle
//! - [`session`] - the per-connection read/write worker pair

pub mod server;
pub mod session;

pub use server::BrokerServer;

use crate::channel::{Queue, Topic};
use crate::config::BrokerConfig;
use crate::metrics::MetricsRegistry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// A live client session as reported by the `clients` listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub remote_addr: String,
    pub name: String,
}

/// The process-wide channel registry.
///
/// Created at server construction, torn down at server close; sessions and
/// the HTTP façade hold it behind an `Arc`.
pub struct Broker {
    queues: DashMap<String, Arc<Queue>>,
    topics: DashMap<String, Arc<Topic>>,
    sessions: DashMap<u64, SessionInfo>,
    default_capacity: usize,
    metrics: Arc<MetricsRegistry>,
}

impl Broker {
    pub fn new(config: &BrokerConfig) -> Arc<Self> {
        Arc::new(Broker {
            queues: DashMap::new(),
            topics: DashMap::new(),
            sessions: DashMap::new(),
            default_capacity: config.default_capacity,
            metrics: MetricsRegistry::new(),
        })
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Look up a queue, creating it on first reference. The `entry` API makes
    /// the check-then-insert atomic.
    pub fn get_or_create_queue(&self, name: &str) -> Arc<Queue> {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let queue = Queue::new(name, self.default_capacity);
                entry.insert(Arc::clone(&queue));
                info!(queue = name, "created queue");
                queue
            }
        }
    }

    /// Look up a topic, creating it on first reference.
    pub fn get_or_create_topic(&self, name: &str) -> Arc<Topic> {
        match self.topics.entry(name.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let topic = Topic::new(name, self.default_capacity);
                entry.insert(Arc::clone(&topic));
                info!(topic = name, "created topic");
                topic
            }
        }
    }

    /// Remove and close a queue. Returns whether it existed. The close runs
    /// after the map entry is gone, so a racing `get_or_create_queue` yields
    /// a fresh instance rather than the dying one.
    pub fn kill_queue(&self, name: &str) -> bool {
        if let Some((_, queue)) = self.queues.remove(name) {
            queue.close();
            info!(queue = name, "killed queue");
            true
        } else {
            false
        }
    }

    /// Remove and close a topic, closing every subscription under it.
    pub fn kill_topic(&self, name: &str) -> bool {
        if let Some((_, topic)) = self.topics.remove(name) {
            topic.close();
            info!(topic = name, "killed topic");
            true
        } else {
            false
        }
    }

    pub fn list_queues(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    pub fn list_topics(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    pub fn list_clients(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn register_session(&self, id: u64, remote_addr: String) {
        self.sessions.insert(
            id,
            SessionInfo {
                id,
                remote_addr,
                name: String::new(),
            },
        );
    }

    pub(crate) fn set_session_name(&self, id: u64, name: String) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.name = name;
        }
    }

    pub(crate) fn deregister_session(&self, id: u64) {
        self.sessions.remove(&id);
    }

    /// Close every channel. Part of server shutdown.
    pub fn close_all(&self) {
        for name in self.list_queues() {
            self.kill_queue(&name);
        }
        for name in self.list_topics() {
            self.kill_topic(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_broker() -> Arc<Broker> {
        Broker::new(&BrokerConfig::default())
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_instance() {
        let broker = test_broker();
        let a = broker.get_or_create_queue("orders");
        let b = broker.get_or_create_queue("orders");
        assert!(Arc::ptr_eq(&a, &b));

        let t1 = broker.get_or_create_topic("events");
        let t2 = broker.get_or_create_topic("events");
        assert!(Arc::ptr_eq(&t1, &t2));
    }

    #[tokio::test]
    async fn kill_then_create_yields_a_fresh_instance() {
        let broker = test_broker();
        let old = broker.get_or_create_queue("orders");
        assert!(broker.kill_queue("orders"));

        let fresh = broker.get_or_create_queue("orders");
        assert!(!Arc::ptr_eq(&old, &fresh));

        // The old instance is closed, the fresh one accepts sends.
        let msg = crate::protocol::data_message(b"x").unwrap();
        assert!(old.send(msg.clone()).await.is_err());
        assert!(fresh.send(msg).await.is_ok());
    }

    #[tokio::test]
    async fn kill_of_unknown_channel_reports_false() {
        let broker = test_broker();
        assert!(!broker.kill_queue("nope"));
        assert!(!broker.kill_topic("nope"));
    }

    #[tokio::test]
    async fn listings_snapshot_registered_names() {
        let broker = test_broker();
        broker.get_or_create_queue("q1");
        broker.get_or_create_queue("q2");
        broker.get_or_create_topic("t1");

        let mut queues = broker.list_queues();
        queues.sort();
        assert_eq!(queues, ["q1", "q2"]);
        assert_eq!(broker.list_topics(), ["t1"]);
    }

    #[tokio::test]
    async fn session_registry_tracks_names() {
        let broker = test_broker();
        broker.register_session(7, "127.0.0.1:5000".to_string());
        broker.set_session_name(7, "ingest-worker".to_string());

        let clients = broker.list_clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id, 7);
        assert_eq!(clients[0].name, "ingest-worker");

        broker.deregister_session(7);
        assert!(broker.list_clients().is_empty());
    }
}
