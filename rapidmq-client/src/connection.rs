//! Connection management for the RapidMQ client
//!
//! A connection wraps a `Framed` TCP stream. Opening writes the 4-byte
//! preamble and the optional `i` label frame before handing the transport to
//! the publisher or subscriber layers.

use crate::config::ClientConfig;
use crate::error::RapidmqClientError;
use crate::protocol::{
    bind_message, id_message, FrameCodec, Message, MAGIC, MSG_ACK, MSG_DATA, MSG_ERROR, MSG_NOOP,
};
use crate::Result;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

pub struct Connection {
    framed: Framed<TcpStream, FrameCodec>,
    request_timeout: Duration,
}

impl Connection {
    /// Connect, send the preamble and the optional client label.
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let mut stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| RapidmqClientError::timeout(config.connect_timeout.as_millis() as u64))?
            .map_err(|e| {
                RapidmqClientError::connection(format!(
                    "failed to connect to {}: {}",
                    config.address, e
                ))
            })?;
        stream.set_nodelay(true)?;
        stream.write_all(&MAGIC).await?;
        debug!(address = %config.address, "connected");

        let mut connection = Connection {
            framed: Framed::new(stream, FrameCodec),
            request_timeout: config.request_timeout,
        };

        if let Some(id) = &config.client_id {
            connection.send(id_message(id)?).await?;
        }

        Ok(connection)
    }

    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.framed.send(msg).await
    }

    /// Next frame off the wire. `None` means the broker closed the
    /// connection.
    pub async fn next_frame(&mut self) -> Result<Option<Message>> {
        self.framed.next().await.transpose()
    }

    /// Send a `p`/`s` frame and wait for the broker's acknowledgement.
    pub async fn bind(&mut self, command: u8, kind: &str, name: &str) -> Result<()> {
        self.send(bind_message(command, kind, name)?).await?;
        self.await_ack().await
    }

    /// Wait for an `a` frame, skipping heartbeats and any in-flight data.
    /// An `e` frame becomes a broker error.
    pub async fn await_ack(&mut self) -> Result<()> {
        let deadline = self.request_timeout;
        timeout(deadline, async {
            loop {
                let Some(frame) = self.next_frame().await? else {
                    return Err(RapidmqClientError::connection(
                        "connection closed while waiting for ack".to_string(),
                    ));
                };
                match frame.command() {
                    MSG_ACK => return Ok(()),
                    MSG_NOOP | MSG_DATA => continue,
                    MSG_ERROR => {
                        return Err(RapidmqClientError::broker(
                            String::from_utf8_lossy(frame.body()).into_owned(),
                        ))
                    }
                    other => {
                        return Err(RapidmqClientError::protocol(format!(
                            "unexpected frame '{}' while waiting for ack",
                            other as char
                        )))
                    }
                }
            }
        })
        .await
        .map_err(|_| RapidmqClientError::timeout(deadline.as_millis() as u64))?
    }

    /// Shut the transport down.
    pub async fn shutdown(mut self) -> Result<()> {
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}
