//! Entry point builder for RapidMQ connections

use crate::config::ClientConfig;
use crate::consumer::Subscriber;
use crate::producer::Publisher;
use crate::Result;
use std::time::Duration;

/// Builder for publisher and subscriber connections.
///
/// ```rust,no_run
/// use rapidmq_client::ClientBuilder;
///
/// # async fn run() -> rapidmq_client::Result<()> {
/// let mut publisher = ClientBuilder::new("localhost:4150")
///     .id("billing")
///     .to_topic("invoices")
///     .await?;
/// publisher.send("invoice #42").await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        ClientBuilder {
            config: ClientConfig::new(address),
        }
    }

    /// Label this connection; the broker shows it in the clients listing.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = Some(id.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Bind as a producer to a queue.
    pub async fn to_queue(self, name: &str) -> Result<Publisher> {
        Publisher::bind(self.config, "queue", name).await
    }

    /// Bind as a producer to a topic.
    pub async fn to_topic(self, name: &str) -> Result<Publisher> {
        Publisher::bind(self.config, "topic", name).await
    }

    /// Subscribe to a queue; competes with other queue subscribers.
    pub async fn subscribe_queue(self, name: &str) -> Result<Subscriber> {
        Subscriber::bind(self.config, "queue", name).await
    }

    /// Subscribe to a topic; receives a copy of every message.
    pub async fn subscribe_topic(self, name: &str) -> Result<Subscriber> {
        Subscriber::bind(self.config, "topic", name).await
    }

    /// Destroy a queue on the broker. Fire-and-forget: the broker sends no
    /// acknowledgement for kills.
    pub async fn kill_queue(self, name: &str) -> Result<()> {
        self.kill("queue", name).await
    }

    /// Destroy a topic on the broker, closing every subscription under it.
    pub async fn kill_topic(self, name: &str) -> Result<()> {
        self.kill("topic", name).await
    }

    async fn kill(self, kind: &str, name: &str) -> Result<()> {
        use crate::protocol::{bind_message, MSG_KILL};

        let mut connection = crate::connection::Connection::open(&self.config).await?;
        connection.send(bind_message(MSG_KILL, kind, name)?).await?;
        connection.shutdown().await
    }
}
