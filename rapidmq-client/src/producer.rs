//! Publisher client for sending messages to RapidMQ

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::protocol::{close_message, data_message, Message, MSG_PUB};
use crate::Result;
use tracing::debug;

/// A producer bound to one queue or topic.
///
/// Created through [`ClientBuilder::to_queue`] or
/// [`ClientBuilder::to_topic`]; the bind acknowledgement has already been
/// consumed by the time the publisher is handed out, so `send` can stream
/// `d` frames immediately.
///
/// [`ClientBuilder::to_queue`]: crate::ClientBuilder::to_queue
/// [`ClientBuilder::to_topic`]: crate::ClientBuilder::to_topic
pub struct Publisher {
    connection: Connection,
    target: String,
}

impl Publisher {
    pub(crate) async fn bind(config: ClientConfig, kind: &str, name: &str) -> Result<Self> {
        let mut connection = Connection::open(&config).await?;
        connection.bind(MSG_PUB, kind, name).await?;
        debug!(kind, name, "publisher bound");
        Ok(Publisher {
            connection,
            target: format!("{} {}", kind, name),
        })
    }

    /// The `"<kind> <name>"` target this publisher is bound to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Publish one message body.
    pub async fn send(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.connection.send(data_message(payload.as_ref())?).await
    }

    /// Publish a pre-built frame.
    pub async fn send_message(&mut self, msg: Message) -> Result<()> {
        self.connection.send(msg).await
    }

    /// Unbind politely and close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.connection.send(close_message()).await?;
        self.connection.await_ack().await?;
        self.connection.shutdown().await
    }
}
