//! # RapidMQ Core Library
//!
//! RapidMQ is a lightweight, in-memory message broker written in Rust. Clients
//! talk to it over a compact length-prefixed wire protocol on TCP, or over an
//! auxiliary HTTP surface for management and REST-style message exchange.
//!
//! ## Features
//!
//! - **Named Queues**: point-to-point delivery with a bounded FIFO and
//!   backpressure on producers
//! - **Named Topics**: fan-out delivery with independently buffered
//!   subscribers; slow subscribers shed messages instead of slowing publishers
//! - **Lazy Channel Creation**: queues and topics come into existence on first
//!   reference and die on explicit kill
//! - **Two-Task Sessions**: every connection runs a read worker and a write
//!   worker joined by a bounded command channel
//! - **HTTP Façade**: JSON listings plus GET/PUT message exchange against the
//!   same channel registry
//!
//! ## Architecture Overview
//!
//! - [`protocol`] - wire frame encoding and the streaming frame reader
//! - [`channel`] - queue, topic and consumer primitives
//! - [`broker`] - the channel registry, per-connection sessions and the TCP
//!   server
//! - [`http`] - the HTTP management façade
//! - [`config`] - broker configuration
//! - [`metrics`] - broker-level counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rapidmq::{BrokerConfig, BrokerServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig {
//!         port: 4150,
//!         http_enabled: true,
//!         ..Default::default()
//!     };
//!
//!     let server = BrokerServer::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod channel;
pub mod config;
pub mod http;
pub mod metrics;
pub mod protocol;

pub use broker::{Broker, BrokerServer, SessionInfo};
pub use channel::{ChannelRef, Consumer, Producer, Queue, Topic};
pub use config::BrokerConfig;
pub use http::HttpFacade;
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use protocol::{Message, MessageBuilder};

use thiserror::Error;

/// RapidMQ error types
///
/// Framing and I/O errors are terminal for the session that raised them;
/// protocol errors are reported back over the wire and the session continues;
/// channel errors map to HTTP status codes on the HTTP path and to error
/// frames on the wire path.
#[derive(Debug, Error)]
pub enum RapidmqError {
    /// Socket and other I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The 4-byte connection preamble did not match `aav1`
    #[error("magic number is error")]
    MagicNumber,

    /// The header length field contained a non-digit after the leading spaces
    #[error("length field of message isn't number")]
    LengthNotDigit,

    /// The body length exceeds the maximum frame size
    #[error("message length is exceed")]
    LengthExceed,

    /// Non-blocking send against a full queue
    #[error("queue is full")]
    QueueFull,

    /// A deadline elapsed before the operation completed
    #[error("operation timed out")]
    Timeout,

    /// Send after close, or receive from a closed channel
    #[error("channel is closed")]
    ChannelClosed,

    /// Second close of an already-closed resource
    #[error("already closed")]
    AlreadyClosed,

    /// Malformed command bodies and other recoverable protocol violations
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration parameters
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization errors on the HTTP surface
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias used throughout the RapidMQ codebase
pub type Result<T> = std::result::Result<T, RapidmqError>;
