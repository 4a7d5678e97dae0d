//! # TCP Server
//!
//! Binds the listener, validates each connection's 4-byte preamble and spawns
//! the session workers. Shutdown fans out through a broadcast channel: the
//! accept loop stops, every channel is killed, and sessions drain as their
//! read workers observe the signal.

use crate::broker::{session, Broker};
use crate::config::BrokerConfig;
use crate::http::HttpFacade;
use crate::protocol::{error_message, MAGIC};
use crate::{RapidmqError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// What the first four bytes of a connection turned out to be.
enum Preamble {
    Valid,
    HttpLike,
    Invalid,
}

pub struct BrokerServer {
    config: BrokerConfig,
    broker: Arc<Broker>,
    shutdown_tx: broadcast::Sender<()>,
    is_stopped: Arc<AtomicBool>,
    next_session_id: AtomicU64,
    local_addr: parking_lot::Mutex<Option<std::net::SocketAddr>>,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate().map_err(RapidmqError::Config)?;

        let broker = Broker::new(&config);
        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(BrokerServer {
            config,
            broker,
            shutdown_tx,
            is_stopped: Arc::new(AtomicBool::new(false)),
            next_session_id: AtomicU64::new(1),
            local_addr: parking_lot::Mutex::new(None),
        })
    }

    /// The address the listener actually bound, once [`run`](Self::run) has
    /// started. Useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock()
    }

    /// The shared channel registry. Embedders and tests reach the channels
    /// through this.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Initiate graceful shutdown: flag first for the fast-path checks, then
    /// wake everything that is waiting.
    pub fn shutdown(&self) {
        if self.is_stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("initiating shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Run the server until shutdown.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        *self.local_addr.lock() = Some(listener.local_addr()?);
        info!(addr = %addr, "rapidmq broker listening");

        if self.config.http_enabled {
            let facade = HttpFacade::new(Arc::clone(&self.broker), self.config.clone());
            let mut http_shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    result = facade.start() => {
                        if let Err(e) = result {
                            error!(error = %e, "http facade error");
                        }
                    }
                    _ = http_shutdown_rx.recv() => {
                        info!("http facade stopping");
                    }
                }
            });
            info!(port = self.config.http_port, "http facade started");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer_addr)) => {
                        if self.is_stopped.load(Ordering::Acquire) {
                            continue;
                        }
                        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                        debug!(session_id, peer = %peer_addr, "accepted connection");

                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(peer = %peer_addr, error = %e, "failed to set nodelay");
                        }

                        let broker = Arc::clone(&self.broker);
                        let noop_interval = self.config.noop_interval();
                        let buffer_size = self.config.buffer_size;
                        let http_port = self.config.http_enabled.then_some(self.config.http_port);
                        let session_shutdown_rx = self.shutdown_tx.subscribe();

                        tokio::spawn(async move {
                            let mut stream = stream;
                            match read_preamble(&mut stream).await {
                                Ok(Preamble::Valid) => {
                                    session::run(
                                        session_id,
                                        stream,
                                        peer_addr,
                                        broker,
                                        noop_interval,
                                        buffer_size,
                                        session_shutdown_rx,
                                    )
                                    .await;
                                }
                                Ok(Preamble::HttpLike) => {
                                    warn!(peer = %peer_addr, "http request on the wire port");
                                    let text = match http_port {
                                        Some(port) => format!(
                                            "http requests are served on port {}.",
                                            port
                                        ),
                                        None => "http surface is disabled.".to_string(),
                                    };
                                    reject(stream, &text).await;
                                }
                                Ok(Preamble::Invalid) => {
                                    warn!(peer = %peer_addr, "bad connection preamble");
                                    reject(stream, &RapidmqError::MagicNumber.to_string()).await;
                                }
                                Err(e) => {
                                    debug!(peer = %peer_addr, error = %e, "connection dropped before preamble");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("accept loop stopping");
                    break;
                }
            }
        }

        drop(listener);
        self.broker.close_all();
        self.wait_for_sessions().await;
        info!("broker stopped");
        Ok(())
    }

    /// Give live sessions a bounded window to drain after shutdown.
    async fn wait_for_sessions(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.broker.session_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let remaining = self.broker.session_count();
        if remaining > 0 {
            warn!(remaining, "sessions still draining at shutdown deadline");
        }
    }
}

/// Read exactly four bytes and classify them.
async fn read_preamble(stream: &mut TcpStream) -> Result<Preamble> {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await?;

    if magic == MAGIC {
        return Ok(Preamble::Valid);
    }
    // An HTTP request line starts with the method name; checking the first
    // four bytes covers every common verb.
    if matches!(&magic, b"GET " | b"PUT " | b"POST" | b"HEAD" | b"DELE" | b"PATC" | b"OPTI") {
        return Ok(Preamble::HttpLike);
    }
    Ok(Preamble::Invalid)
}

/// Best-effort error frame, then close.
async fn reject(mut stream: TcpStream, text: &str) {
    let msg = error_message(text);
    let _ = stream.write_all(msg.as_bytes()).await;
    let _ = stream.shutdown().await;
}
