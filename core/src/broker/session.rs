//! # Connection Sessions
//!
//! Every accepted connection runs two cooperating workers joined by a bounded
//! command channel:
//!
//! - the **read worker** pulls frames off the socket through a
//!   [`FrameReader`] and translates them into [`SessionCommand`]s; it also
//!   holds the producer binding and forwards `d` frames inline so a single
//!   producer's messages reach their channel in wire order
//! - the **write worker** serves the command channel, pumps the active
//!   consumer endpoint, and emits `n` heartbeats while a subscription is
//!   active
//!
//! Binding rules: at most one producer binding and one consumer subscription
//! per session. Subscribing resets any existing binding; `c` closes the
//! active subscription. All message-source switching happens on the write
//! worker, driven by commands from the read worker.
//!
//! Either worker exiting tears the session down: the supervisor gives the
//! write worker a short grace to flush a final error frame, then both halves
//! of the socket drop and the peer observes the close.

use crate::channel::{ChannelRef, Consumer, Producer};
use crate::metrics::MetricsRegistry;
use crate::protocol::{
    ack_message, command_name, error_message, noop_message, FrameReader, Message, MSG_CLOSE,
    MSG_DATA, MSG_ERROR, MSG_ID, MSG_KILL, MSG_NOOP, MSG_PUB, MSG_SUB,
};
use crate::broker::Broker;
use crate::RapidmqError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Depth of the intra-connection command queue between the two workers.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// How long the supervisor lets the write worker drain after the read worker
/// exits, so a final error frame still reaches the peer.
const WRITE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Commands posted by the read worker for the write worker to serve.
pub(crate) enum SessionCommand {
    /// Write an error frame and keep serving; protocol errors are
    /// recoverable.
    Reply(Message),
    /// Write an error frame, then terminate the session.
    Error(Message),
    /// Acknowledge a producer bind and clear the message source.
    BindProducer,
    /// Acknowledge a subscription and start pumping its endpoint.
    BindConsumer(Arc<Consumer>),
    /// Close the carried subscription (if any), clear the message source,
    /// acknowledge.
    CloseBinding(Option<Arc<Consumer>>),
}

/// Shared slot holding the session's active subscription so teardown can
/// close it no matter which worker died first.
type SubscriptionSlot = Arc<parking_lot::Mutex<Option<Arc<Consumer>>>>;

/// Run one session to completion. Returns when the connection is torn down.
pub(crate) async fn run(
    session_id: u64,
    stream: TcpStream,
    peer_addr: SocketAddr,
    broker: Arc<Broker>,
    noop_interval: Duration,
    buffer_size: usize,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let metrics = broker.metrics();
    metrics.broker.connection_opened();
    broker.register_session(session_id, peer_addr.to_string());
    debug!(session_id, peer = %peer_addr, "session started");

    let (read_half, write_half) = stream.into_split();
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let subscription: SubscriptionSlot = Arc::new(parking_lot::Mutex::new(None));

    let ctx = ExecCtx {
        broker: Arc::clone(&broker),
        metrics: Arc::clone(&metrics),
        session_id,
        cmd_tx,
        producer: None,
        subscription: Arc::clone(&subscription),
    };

    let mut read_task = tokio::spawn(read_loop(read_half, buffer_size, ctx, shutdown_rx));
    let mut write_task = tokio::spawn(write_loop(
        write_half,
        cmd_rx,
        noop_interval,
        session_id,
        Arc::clone(&metrics),
    ));

    tokio::select! {
        _ = &mut read_task => {
            // The read worker dropped its command sender; give the write
            // worker a moment to flush any final frame before stopping it.
            let _ = tokio::time::timeout(WRITE_DRAIN_GRACE, &mut write_task).await;
            write_task.abort();
            let _ = write_task.await;
        }
        _ = &mut write_task => {
            read_task.abort();
            let _ = read_task.await;
        }
    }

    if let Some(consumer) = subscription.lock().take() {
        consumer.close();
    }
    broker.deregister_session(session_id);
    metrics.broker.connection_closed();
    debug!(session_id, peer = %peer_addr, "session closed");
}

/// Read worker: frames in, commands out.
async fn read_loop(
    read_half: OwnedReadHalf,
    buffer_size: usize,
    mut ctx: ExecCtx,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut reader = FrameReader::with_capacity(read_half, buffer_size);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(session_id = ctx.session_id, "read worker stopping for shutdown");
                break;
            }
            result = reader.read_message() => match result {
                Ok(Some(msg)) => {
                    ctx.metrics.broker.frame_received();
                    if !ctx.execute(msg).await {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(RapidmqError::Io(e)) => {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        debug!(session_id = ctx.session_id, "peer disconnected");
                    } else {
                        warn!(session_id = ctx.session_id, error = %e, "read failed");
                    }
                    break;
                }
                Err(e) => {
                    // Framing error: terminal, but try to tell the peer why.
                    warn!(session_id = ctx.session_id, error = %e, "framing error");
                    let _ = ctx
                        .cmd_tx
                        .send(SessionCommand::Error(error_message(&e.to_string())))
                        .await;
                    break;
                }
            }
        }
    }
}

/// The read worker's execution context: producer binding plus the command
/// sender into the write worker.
struct ExecCtx {
    broker: Arc<Broker>,
    metrics: Arc<MetricsRegistry>,
    session_id: u64,
    cmd_tx: mpsc::Sender<SessionCommand>,
    producer: Option<Producer>,
    subscription: SubscriptionSlot,
}

impl ExecCtx {
    /// Dispatch one frame. Returns `false` when the session must stop
    /// reading.
    async fn execute(&mut self, msg: Message) -> bool {
        match msg.command() {
            MSG_NOOP => true,

            MSG_ID => {
                let name = String::from_utf8_lossy(msg.body()).trim().to_string();
                self.broker.set_session_name(self.session_id, name);
                true
            }

            MSG_KILL => match parse_target(msg.body()) {
                Some(("queue", name)) => {
                    self.broker.kill_queue(name);
                    true
                }
                Some(("topic", name)) => {
                    self.broker.kill_topic(name);
                    true
                }
                _ => self.reply_invalid(msg.body()).await,
            },

            MSG_ERROR => {
                error!(
                    session_id = self.session_id,
                    "client reported error: {}",
                    String::from_utf8_lossy(msg.body())
                );
                false
            }

            MSG_CLOSE => {
                let closer = self.subscription.lock().take();
                self.producer = None;
                self.post(SessionCommand::CloseBinding(closer)).await
            }

            MSG_DATA => {
                let Some(producer) = self.producer.clone() else {
                    return self.reply_error("state error.").await;
                };
                match producer.send(msg).await {
                    Ok(()) => {
                        self.metrics.broker.message_published();
                        true
                    }
                    Err(e) => {
                        // The channel under this producer is gone; the
                        // session cannot make progress.
                        self.post(SessionCommand::Error(error_message(&format!(
                            "failed to send message, {}",
                            e
                        ))))
                        .await;
                        false
                    }
                }
            }

            MSG_PUB => match self.resolve_channel(msg.body()) {
                Some(channel) => {
                    self.producer = Some(Producer::Channel(channel));
                    self.post(SessionCommand::BindProducer).await
                }
                None => self.reply_invalid(msg.body()).await,
            },

            MSG_SUB => match self.resolve_channel(msg.body()) {
                Some(channel) => {
                    self.reset();
                    let consumer = channel.subscribe();
                    *self.subscription.lock() = Some(Arc::clone(&consumer));
                    self.post(SessionCommand::BindConsumer(consumer)).await
                }
                None => self.reply_invalid(msg.body()).await,
            },

            other => {
                warn!(
                    session_id = self.session_id,
                    command = command_name(other),
                    "unknown command"
                );
                self.reply_error(&format!("unknown command - {}.", command_name(other)))
                    .await
            }
        }
    }

    /// Close the active subscription and drop the producer binding.
    fn reset(&mut self) {
        if let Some(consumer) = self.subscription.lock().take() {
            consumer.close();
        }
        self.producer = None;
    }

    fn resolve_channel(&self, body: &[u8]) -> Option<ChannelRef> {
        match parse_target(body)? {
            ("queue", name) => Some(ChannelRef::Queue(self.broker.get_or_create_queue(name))),
            ("topic", name) => Some(ChannelRef::Topic(self.broker.get_or_create_topic(name))),
            _ => None,
        }
    }

    async fn post(&mut self, cmd: SessionCommand) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }

    async fn reply_error(&mut self, text: &str) -> bool {
        self.post(SessionCommand::Reply(error_message(text))).await
    }

    async fn reply_invalid(&mut self, body: &[u8]) -> bool {
        let text = format!("invalid command - '{}'.", String::from_utf8_lossy(body));
        self.reply_error(&text).await
    }
}

/// Parse a `"queue NAME"` / `"topic NAME"` body: exactly two
/// whitespace-separated fields.
fn parse_target(body: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(body).ok()?;
    let mut fields = text.split_whitespace();
    let kind = fields.next()?;
    let name = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    Some((kind, name))
}

/// Write worker: commands and consumer messages out, heartbeats on the side.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    noop_interval: Duration,
    session_id: u64,
    metrics: Arc<MetricsRegistry>,
) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + noop_interval,
        noop_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut source: Option<Arc<Consumer>> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Read worker is gone; nothing more will be asked of us.
                    return;
                };
                match cmd {
                    SessionCommand::Reply(msg) => {
                        if write_frame(&mut write_half, &msg, &metrics).await.is_err() {
                            return;
                        }
                    }
                    SessionCommand::Error(msg) => {
                        if let Err(e) = write_frame(&mut write_half, &msg, &metrics).await {
                            debug!(session_id, error = %e, "failed to send error frame");
                        }
                        return;
                    }
                    SessionCommand::BindProducer => {
                        source = None;
                        if write_frame(&mut write_half, &ack_message(), &metrics).await.is_err() {
                            return;
                        }
                    }
                    SessionCommand::BindConsumer(consumer) => {
                        if write_frame(&mut write_half, &ack_message(), &metrics).await.is_err() {
                            return;
                        }
                        source = Some(consumer);
                    }
                    SessionCommand::CloseBinding(closer) => {
                        if let Some(consumer) = closer {
                            consumer.close();
                        }
                        source = None;
                        if write_frame(&mut write_half, &ack_message(), &metrics).await.is_err() {
                            return;
                        }
                    }
                }
            }

            msg = recv_from(&source), if source.is_some() => {
                match msg {
                    Some(msg) => {
                        if let Err(e) = write_frame(&mut write_half, &msg, &metrics).await {
                            debug!(session_id, error = %e, "failed to send data frame");
                            return;
                        }
                    }
                    None => {
                        // The channel under the subscription was killed.
                        let msg = error_message("message channel is closed.");
                        if let Err(e) = write_frame(&mut write_half, &msg, &metrics).await {
                            debug!(session_id, error = %e, "failed to send closed notice");
                        }
                        return;
                    }
                }
            }

            _ = ticker.tick() => {
                if source.is_some()
                    && write_frame(&mut write_half, &noop_message(), &metrics).await.is_err()
                {
                    return;
                }
            }
        }
    }
}

async fn recv_from(source: &Option<Arc<Consumer>>) -> Option<Message> {
    match source {
        Some(consumer) => consumer.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_frame(
    write_half: &mut OwnedWriteHalf,
    msg: &Message,
    metrics: &MetricsRegistry,
) -> std::io::Result<()> {
    write_half.write_all(msg.as_bytes()).await?;
    metrics.broker.frame_sent();
    Ok(())
}
