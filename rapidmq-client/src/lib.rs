//! # RapidMQ Client Library
//!
//! An async Rust client for the RapidMQ message broker.
//!
//! ## Features
//!
//! - **Async/Await**: built on tokio for non-blocking I/O
//! - **Zero-Copy Frames**: message payloads ride on `bytes::Bytes`
//! - **Typed Errors**: broker `e` frames surface as structured errors
//! - **Small Surface**: a builder, a publisher and a subscriber
//!
//! ## Quick Start
//!
//! ### Publisher Example
//!
//! ```rust,no_run
//! use rapidmq_client::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut publisher = ClientBuilder::new("localhost:4150")
//!         .id("example-producer")
//!         .to_queue("greetings")
//!         .await?;
//!
//!     publisher.send("Hello RapidMQ!").await?;
//!     publisher.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Subscriber Example
//!
//! ```rust,no_run
//! use rapidmq_client::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut subscriber = ClientBuilder::new("localhost:4150")
//!         .subscribe_queue("greetings")
//!         .await?;
//!
//!     while let Some(msg) = subscriber.next_message().await? {
//!         println!("received: {}", String::from_utf8_lossy(msg.body()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod protocol;

pub use client::ClientBuilder;
pub use config::ClientConfig;
pub use consumer::Subscriber;
pub use error::RapidmqClientError;
pub use producer::Publisher;
pub use protocol::Message;

/// Client library result type
pub type Result<T> = std::result::Result<T, RapidmqClientError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
