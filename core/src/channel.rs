//! # Channel Primitives
//!
//! The delivery fabric of the broker: point-to-point [`Queue`]s, fan-out
//! [`Topic`]s and the [`Consumer`] subscription handles that connect sessions
//! (and HTTP requests) to them.
//!
//! The two channel kinds make opposite backpressure choices:
//!
//! - a full queue blocks (or fails fast for) the producer; no message is
//!   ever dropped inside a queue
//! - a full topic subscriber loses the message and its `discarded` counter
//!   rises, so a slow subscriber never slows the publisher or its peers
//!
//! Lock discipline: the topic subscriber set is behind a
//! `parking_lot::RwLock`. Readers only ever `try_send` while holding the read
//! lease, and writers never await, so no lease is ever held across a
//! suspension point.

use crate::protocol::Message;
use crate::{RapidmqError, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A receive endpoint. Queue consumers share the queue's singleton endpoint;
/// topic consumers each own a fresh one.
type Endpoint = Arc<Mutex<mpsc::Receiver<Message>>>;

/// Point-to-point named channel: bounded FIFO with a single shared receive
/// endpoint. Concurrent receivers compete; each message is delivered to
/// exactly one of them.
pub struct Queue {
    name: String,
    tx: parking_lot::Mutex<Option<mpsc::Sender<Message>>>,
    endpoint: Endpoint,
}

impl Queue {
    pub(crate) fn new(name: &str, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity);
        Arc::new(Queue {
            name: name.to_string(),
            tx: parking_lot::Mutex::new(Some(tx)),
            endpoint: Arc::new(Mutex::new(rx)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> Result<mpsc::Sender<Message>> {
        self.tx.lock().clone().ok_or(RapidmqError::ChannelClosed)
    }

    /// Send, waiting for capacity. Never drops.
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.sender()?
            .send(msg)
            .await
            .map_err(|_| RapidmqError::ChannelClosed)
    }

    /// Send with a deadline. A zero timeout is a non-blocking attempt that
    /// fails immediately with `QueueFull`.
    pub async fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<()> {
        let tx = self.sender()?;
        if timeout.is_zero() {
            return tx.try_send(msg).map_err(|e| match e {
                TrySendError::Full(_) => RapidmqError::QueueFull,
                TrySendError::Closed(_) => RapidmqError::ChannelClosed,
            });
        }
        match tokio::time::timeout(timeout, tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RapidmqError::ChannelClosed),
            Err(_) => Err(RapidmqError::Timeout),
        }
    }

    /// A consumer aliased onto the queue's singleton endpoint.
    pub fn subscribe(&self) -> Arc<Consumer> {
        Consumer::for_queue(self.endpoint.clone())
    }

    /// Close the queue: producers observe a closed-channel error, receivers
    /// drain whatever is buffered and then see the end of the channel.
    ///
    /// Dropping the send side is what actually closes the channel; the
    /// receiver is closed too when nobody is busy receiving, so waiting
    /// producers fail immediately rather than on drain.
    pub fn close(&self) {
        self.tx.lock().take();
        if let Ok(mut rx) = self.endpoint.try_lock() {
            rx.close();
        }
    }
}

/// Named fan-out channel. Every subscriber gets its own bounded endpoint of
/// the topic's capacity; `send` try-sends to each under a read lease.
pub struct Topic {
    name: String,
    capacity: usize,
    last_id: AtomicU64,
    subscribers: RwLock<Vec<Arc<Consumer>>>,
}

impl Topic {
    pub(crate) fn new(name: &str, capacity: usize) -> Arc<Self> {
        Arc::new(Topic {
            name: name.to_string(),
            capacity,
            last_id: AtomicU64::new(0),
            subscribers: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best-effort fan-out. Full endpoints count a discard; the publisher is
    /// never blocked.
    pub fn send(&self, msg: &Message) {
        let subs = self.subscribers.read();
        for consumer in subs.iter() {
            consumer.offer(msg.clone());
        }
    }

    /// Fan-out with a shared deadline for slow subscribers.
    ///
    /// The first pass is identical to [`send`](Topic::send) except that
    /// would-block consumers are collected for a retry. The retry waits on
    /// each pending consumer against the remaining deadline; once it expires
    /// every consumer still pending gets one final non-blocking attempt.
    pub async fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<()> {
        let mut retry: Vec<(mpsc::Sender<Message>, Arc<Consumer>)> = Vec::new();
        {
            let subs = self.subscribers.read();
            for consumer in subs.iter() {
                match consumer.try_enqueue(msg.clone()) {
                    Offer::Enqueued | Offer::Closed => {}
                    Offer::Full => {
                        if timeout.is_zero() {
                            consumer.note_discarded();
                        } else if let Some(tx) = consumer.sender() {
                            retry.push((tx, consumer.clone()));
                        }
                    }
                }
            }
        }

        if retry.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        for (tx, consumer) in retry {
            match tokio::time::timeout_at(deadline, tx.send(msg.clone())).await {
                Ok(Ok(())) => consumer.note_delivered(),
                // Endpoint closed underneath us; neither delivered nor dropped.
                Ok(Err(_)) => {}
                Err(_) => match tx.try_send(msg.clone()) {
                    Ok(()) => consumer.note_delivered(),
                    Err(TrySendError::Full(_)) => consumer.note_discarded(),
                    Err(TrySendError::Closed(_)) => {}
                },
            }
        }
        Ok(())
    }

    /// Register a new subscriber with a fresh endpoint.
    pub fn subscribe(self: &Arc<Self>) -> Arc<Consumer> {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.capacity);
        let consumer = Consumer::for_topic(id, Arc::downgrade(self), tx, rx);
        self.subscribers.write().push(consumer.clone());
        consumer
    }

    /// Remove a subscriber. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: u64) {
        let mut subs = self.subscribers.write();
        if let Some(idx) = subs.iter().position(|c| c.id() == id) {
            subs.remove(idx);
        }
    }

    /// Snapshot of the current subscriber set.
    pub fn consumers(&self) -> Vec<Arc<Consumer>> {
        self.subscribers.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Detach every subscriber and close them outside the lock.
    pub fn close(&self) {
        let detached = std::mem::take(&mut *self.subscribers.write());
        for consumer in detached {
            consumer.close();
        }
    }
}

enum Offer {
    Enqueued,
    Full,
    Closed,
}

/// A subscription handle binding one receiver to a queue or topic.
///
/// The parent-topic reference is weak: the topic owns the subscription's
/// lifetime (it closes consumers on topic close), while the holder of this
/// handle owns the right to close early. Close is idempotent through a
/// compare-and-swap on the `closed` flag.
pub struct Consumer {
    id: u64,
    topic: Weak<Topic>,
    tx: parking_lot::Mutex<Option<mpsc::Sender<Message>>>,
    endpoint: Endpoint,
    delivered: AtomicU64,
    discarded: AtomicU64,
    closed: AtomicBool,
}

impl Consumer {
    fn for_queue(endpoint: Endpoint) -> Arc<Self> {
        Arc::new(Consumer {
            id: 0,
            topic: Weak::new(),
            tx: parking_lot::Mutex::new(None),
            endpoint,
            delivered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn for_topic(
        id: u64,
        topic: Weak<Topic>,
        tx: mpsc::Sender<Message>,
        rx: mpsc::Receiver<Message>,
    ) -> Arc<Self> {
        Arc::new(Consumer {
            id,
            topic,
            tx: parking_lot::Mutex::new(Some(tx)),
            endpoint: Arc::new(Mutex::new(rx)),
            delivered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn note_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn note_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn sender(&self) -> Option<mpsc::Sender<Message>> {
        self.tx.lock().clone()
    }

    /// Non-blocking enqueue attempt without counter updates.
    fn try_enqueue(&self, msg: Message) -> Offer {
        let Some(tx) = self.sender() else {
            return Offer::Closed;
        };
        match tx.try_send(msg) {
            Ok(()) => {
                self.note_delivered();
                Offer::Enqueued
            }
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Non-blocking enqueue with counter accounting: full endpoints count a
    /// discard.
    fn offer(&self, msg: Message) {
        if let Offer::Full = self.try_enqueue(msg) {
            self.note_discarded();
        }
    }

    /// Receive the next message. `None` means the endpoint is closed and
    /// drained.
    pub async fn recv(&self) -> Option<Message> {
        self.endpoint.lock().await.recv().await
    }

    /// Close this subscription.
    ///
    /// Idempotent: the compare-and-swap lets exactly one caller run the
    /// detach, and every later call is a no-op. Consumers aliased to a
    /// queue's singleton endpoint only flip their flag; the endpoint itself
    /// belongs to the queue.
    ///
    /// Detaching from the topic and dropping the send side is what ends the
    /// subscription; a receiver blocked on the endpoint drains and then
    /// observes the closed channel without this call ever needing the
    /// endpoint lock.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Some(topic) = self.topic.upgrade() {
            topic.unsubscribe(self.id);
        }
        if self.tx.lock().take().is_some() {
            if let Ok(mut rx) = self.endpoint.try_lock() {
                rx.close();
            }
        }
    }
}

/// The narrow channel capability consumed by sessions and the HTTP façade:
/// a queue or a topic, addressed uniformly.
#[derive(Clone)]
pub enum ChannelRef {
    Queue(Arc<Queue>),
    Topic(Arc<Topic>),
}

impl ChannelRef {
    pub fn name(&self) -> &str {
        match self {
            ChannelRef::Queue(q) => q.name(),
            ChannelRef::Topic(t) => t.name(),
        }
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        match self {
            ChannelRef::Queue(q) => q.send(msg).await,
            ChannelRef::Topic(t) => {
                t.send(&msg);
                Ok(())
            }
        }
    }

    pub async fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<()> {
        match self {
            ChannelRef::Queue(q) => q.send_timeout(msg, timeout).await,
            ChannelRef::Topic(t) => t.send_timeout(msg, timeout).await,
        }
    }

    pub fn subscribe(&self) -> Arc<Consumer> {
        match self {
            ChannelRef::Queue(q) => q.subscribe(),
            ChannelRef::Topic(t) => t.subscribe(),
        }
    }
}

/// A session's publish target: a real channel or the discarding endpoint.
///
/// The discarding endpoint accepts every message and drops it on the floor;
/// embedders use it to blackhole a producer without tearing the session down.
#[derive(Clone)]
pub enum Producer {
    Channel(ChannelRef),
    Discard,
}

impl Producer {
    pub async fn send(&self, msg: Message) -> Result<()> {
        match self {
            Producer::Channel(ch) => ch.send(msg).await,
            Producer::Discard => Ok(()),
        }
    }

    pub async fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<()> {
        match self {
            Producer::Channel(ch) => ch.send_timeout(msg, timeout).await,
            Producer::Discard => Ok(()),
        }
    }
}
