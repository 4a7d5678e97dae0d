//! Subscriber client for receiving messages from RapidMQ

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::RapidmqClientError;
use crate::protocol::{close_message, Message, MSG_DATA, MSG_ERROR, MSG_NOOP, MSG_SUB};
use crate::Result;
use tracing::debug;

/// A consumer bound to one queue or topic.
///
/// The broker pushes `d` frames and `n` heartbeats; [`next_message`] hides
/// the heartbeats and surfaces broker `e` frames as errors, while
/// [`next_frame`] hands over everything raw.
///
/// [`next_message`]: Subscriber::next_message
/// [`next_frame`]: Subscriber::next_frame
pub struct Subscriber {
    connection: Connection,
    target: String,
}

impl Subscriber {
    pub(crate) async fn bind(config: ClientConfig, kind: &str, name: &str) -> Result<Self> {
        let mut connection = Connection::open(&config).await?;
        connection.bind(MSG_SUB, kind, name).await?;
        debug!(kind, name, "subscriber bound");
        Ok(Subscriber {
            connection,
            target: format!("{} {}", kind, name),
        })
    }

    /// The `"<kind> <name>"` target this subscriber is bound to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Next data frame, heartbeats filtered out. `None` means the broker
    /// closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(frame) = self.connection.next_frame().await? else {
                return Ok(None);
            };
            match frame.command() {
                MSG_DATA => return Ok(Some(frame)),
                MSG_NOOP => continue,
                MSG_ERROR => {
                    return Err(RapidmqClientError::broker(
                        String::from_utf8_lossy(frame.body()).into_owned(),
                    ))
                }
                other => {
                    return Err(RapidmqClientError::protocol(format!(
                        "unexpected frame '{}' on subscription",
                        other as char
                    )))
                }
            }
        }
    }

    /// Next raw frame, heartbeats included.
    pub async fn next_frame(&mut self) -> Result<Option<Message>> {
        self.connection.next_frame().await
    }

    /// Unsubscribe politely and close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.connection.send(close_message()).await?;
        self.connection.await_ack().await?;
        self.connection.shutdown().await
    }
}
