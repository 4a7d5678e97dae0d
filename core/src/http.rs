//! HTTP façade over the channel registry
//!
//! An alternate, REST-style surface onto the same queues and topics the wire
//! protocol serves:
//!
//! - listing endpoints for queues, topics and connected clients
//! - `GET /mq/queue/NAME` waits for one message and returns its body
//! - `PUT|POST /mq/queue/NAME` publishes the request body
//! - the same pair under `/mq/topic/NAME`
//! - a counters snapshot under `/metrics/json`
//!
//! Everything else is redirected to the configured URL or answered 404.

use crate::broker::Broker;
use crate::channel::ChannelRef;
use crate::config::BrokerConfig;
use crate::protocol::data_message;
use crate::RapidmqError;
use atomic_http::external::http::header::{CONTENT_TYPE, LOCATION};
use atomic_http::external::http::{Method, Request, Response, StatusCode};
use atomic_http::{ArenaBody, ArenaWriter, ResponseUtilArena, Server};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default wait for `GET /mq/queue/NAME` when no `timeout` param is given.
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct HttpFacade {
    broker: Arc<Broker>,
    config: BrokerConfig,
}

impl HttpFacade {
    pub fn new(broker: Arc<Broker>, config: BrokerConfig) -> Self {
        HttpFacade { broker, config }
    }

    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let address = format!("{}:{}", self.config.host, self.config.http_port);
        let mut server = Server::new(&address).await?;
        info!(addr = %address, "http facade listening");

        loop {
            match server.accept().await {
                Ok(accept) => {
                    let broker = Arc::clone(&self.broker);
                    let config = self.config.clone();

                    tokio::spawn(async move {
                        let (request, response) = match accept.parse_request_arena_writer().await {
                            Ok(data) => data,
                            Err(e) => {
                                warn!("failed to parse request: {e:?}");
                                return;
                            }
                        };
                        Self::handle_connection(request, response, broker, config)
                            .await
                            .unwrap_or_else(|e| {
                                warn!("request handling failed: {e:?}");
                            });
                    })
                }
                Err(e) => {
                    error!("failed to accept connection: {e:?}");
                    continue;
                }
            };
        }
    }

    async fn handle_connection(
        request: Request<ArenaBody>,
        mut response: Response<ArenaWriter>,
        broker: Arc<Broker>,
        config: BrokerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let full_path = request.uri().path().to_string();
        let path = match strip_prefix(&full_path, &config.http_prefix) {
            Some(path) => path.to_string(),
            None => {
                Self::fallback(&mut response, &config)?;
                response.responser_arena().await?;
                return Ok(());
            }
        };
        let timeout_param = parse_timeout(request.uri().query());

        match (request.method(), path.as_str()) {
            (&Method::GET, "/mq/queues") => {
                response.body_mut().set_arena_json(&broker.list_queues())?;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, "application/json".parse()?);
                *response.status_mut() = StatusCode::OK;
            }
            (&Method::GET, "/mq/topics") => {
                response.body_mut().set_arena_json(&broker.list_topics())?;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, "application/json".parse()?);
                *response.status_mut() = StatusCode::OK;
            }
            (&Method::GET, "/mq/clients") => {
                response.body_mut().set_arena_json(&broker.list_clients())?;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, "application/json".parse()?);
                *response.status_mut() = StatusCode::OK;
            }
            (&Method::GET, "/metrics/json") => {
                response
                    .body_mut()
                    .set_arena_json(&broker.metrics().snapshot())?;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, "application/json".parse()?);
                *response.status_mut() = StatusCode::OK;
            }
            (method, url) if url.starts_with("/mq/queue/") => {
                let name = channel_name(url, "/mq/queue/");
                let channel = ChannelRef::Queue(broker.get_or_create_queue(name));
                Self::exchange(method, &request, &mut response, channel, timeout_param).await?;
            }
            (method, url) if url.starts_with("/mq/topic/") => {
                let name = channel_name(url, "/mq/topic/");
                let channel = ChannelRef::Topic(broker.get_or_create_topic(name));
                Self::exchange(method, &request, &mut response, channel, timeout_param).await?;
            }
            _ => {
                Self::fallback(&mut response, &config)?;
            }
        }

        response.responser_arena().await?;
        Ok(())
    }

    /// One message in or out of a channel, REST-style.
    async fn exchange(
        method: &Method,
        request: &Request<ArenaBody>,
        response: &mut Response<ArenaWriter>,
        channel: ChannelRef,
        timeout_param: Option<Duration>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if method == Method::GET {
            let timeout = timeout_param.unwrap_or(DEFAULT_RECEIVE_TIMEOUT);
            let consumer = channel.subscribe();
            let outcome = tokio::time::timeout(timeout, consumer.recv()).await;
            consumer.close();

            match outcome {
                Ok(Some(msg)) => {
                    let body = String::from_utf8_lossy(msg.body()).into_owned();
                    response.body_mut().set_arena_response(&body)?;
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, "text/plain".parse()?);
                    *response.status_mut() = StatusCode::OK;
                }
                Ok(None) => {
                    response.body_mut().set_arena_response("channel is closed.")?;
                    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                }
                Err(_) => {
                    *response.status_mut() = StatusCode::NO_CONTENT;
                }
            }
        } else if method == Method::PUT || method == Method::POST {
            let payload = request.body().get_body_bytes();
            let msg = match data_message(payload.as_ref()) {
                Ok(msg) => msg,
                Err(e) => {
                    response.body_mut().set_arena_response(&e.to_string())?;
                    *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
                    return Ok(());
                }
            };

            // The publish default is non-blocking; `timeout=0` and a missing
            // param both mean fail fast on a full queue.
            let timeout = timeout_param.unwrap_or(Duration::ZERO);
            match channel.send_timeout(msg, timeout).await {
                Ok(()) => {
                    response.body_mut().set_arena_response("OK")?;
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, "text/plain".parse()?);
                    *response.status_mut() = StatusCode::OK;
                }
                Err(e @ (RapidmqError::QueueFull | RapidmqError::Timeout)) => {
                    response.body_mut().set_arena_response(&e.to_string())?;
                    *response.status_mut() = StatusCode::REQUEST_TIMEOUT;
                }
                Err(e) => {
                    response.body_mut().set_arena_response(&e.to_string())?;
                    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                }
            }
        } else {
            response
                .body_mut()
                .set_arena_response("method must be GET, PUT or POST.")?;
            *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        }
        Ok(())
    }

    fn fallback(
        response: &mut Response<ArenaWriter>,
        config: &BrokerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(url) = &config.http_redirect_url {
            response.headers_mut().insert(LOCATION, url.parse()?);
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
        } else {
            response.body_mut().set_arena_response("404 Not Found")?;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, "text/plain".parse()?);
            *response.status_mut() = StatusCode::NOT_FOUND;
        }
        Ok(())
    }
}

/// Strip the configured prefix. `None` means the request misses the façade
/// entirely and goes to the fallback.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    path.strip_prefix(prefix)
}

/// The channel name is the rest of the path, sans trailing slash.
fn channel_name<'a>(path: &'a str, route: &str) -> &'a str {
    path[route.len()..].trim_end_matches('/')
}

/// Extract a `timeout` query param. Accepts Go-style duration strings with
/// `ms`, `s` and `m` suffixes; unparsable values are ignored.
fn parse_timeout(query: Option<&str>) -> Option<Duration> {
    let query = query?;
    let value = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "timeout")
        .map(|(_, value)| value)?;
    parse_duration(value)
}

fn parse_duration(value: &str) -> Option<Duration> {
    if value == "0" {
        return Some(Duration::ZERO);
    }
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = value.strip_suffix('s') {
        // Negative, infinite and NaN values all parse as f64 but would
        // panic in Duration::from_secs_f64; fail closed instead.
        return secs
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64);
    }
    if let Some(mins) = value.strip_suffix('m') {
        return mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    None
}
