//! Tests for the HTTP façade, driven with hand-written HTTP/1.1 requests.

use rapidmq::{BrokerConfig, BrokerServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn start_server(http_port: u16, mut config: BrokerConfig) -> (Arc<BrokerServer>, String) {
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.http_enabled = true;
    config.http_port = http_port;

    let server = Arc::new(BrokerServer::new(config).expect("valid config"));
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    timeout(Duration::from_secs(5), async {
        loop {
            if server.local_addr().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server failed to start");

    // Give the façade's own listener a moment to bind.
    let http_addr = format!("127.0.0.1:{}", http_port);
    timeout(Duration::from_secs(5), async {
        loop {
            if TcpStream::connect(&http_addr).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("http facade never came up");

    (server, http_addr)
}

async fn http_request(addr: &str, request: String) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let _ = timeout(Duration::from_secs(3), stream.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}

fn get(addr: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    )
}

fn put(addr: &str, path: &str, body: &str) -> String {
    format!(
        "PUT {} HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        path,
        addr,
        body.len(),
        body
    )
}

fn status_of(response: &str) -> &str {
    response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("")
}

#[tokio::test]
async fn put_then_get_round_trips_a_message() {
    let (_server, http_addr) = start_server(24151, BrokerConfig::default()).await;

    let response = http_request(&http_addr, put(&http_addr, "/mq/queue/http-q", "hi")).await;
    assert_eq!(status_of(&response), "200", "PUT failed: {}", response);

    let response = http_request(&http_addr, get(&http_addr, "/mq/queue/http-q?timeout=1s")).await;
    assert_eq!(status_of(&response), "200", "GET failed: {}", response);
    assert!(response.ends_with("hi"), "missing body: {}", response);

    // The queue is empty now; a short wait comes back 204.
    let response =
        http_request(&http_addr, get(&http_addr, "/mq/queue/http-q?timeout=100ms")).await;
    assert_eq!(status_of(&response), "204", "expected no content: {}", response);
}

#[tokio::test]
async fn put_against_a_full_queue_times_out() {
    let config = BrokerConfig {
        default_capacity: 1,
        ..Default::default()
    };
    let (_server, http_addr) = start_server(24152, config).await;

    let response = http_request(&http_addr, put(&http_addr, "/mq/queue/tiny", "first")).await;
    assert_eq!(status_of(&response), "200", "first PUT failed: {}", response);

    // Queue capacity is 1 and nothing consumes; the default publish timeout
    // is non-blocking.
    let response = http_request(&http_addr, put(&http_addr, "/mq/queue/tiny", "second")).await;
    assert_eq!(status_of(&response), "408", "expected timeout: {}", response);
}

#[tokio::test]
async fn listings_report_live_channels() {
    let (server, http_addr) = start_server(24153, BrokerConfig::default()).await;

    server.broker().get_or_create_queue("listed-queue");
    server.broker().get_or_create_topic("listed-topic");

    let response = http_request(&http_addr, get(&http_addr, "/mq/queues")).await;
    assert_eq!(status_of(&response), "200");
    assert!(response.contains("listed-queue"), "body: {}", response);

    let response = http_request(&http_addr, get(&http_addr, "/mq/topics")).await;
    assert!(response.contains("listed-topic"), "body: {}", response);

    let response = http_request(&http_addr, get(&http_addr, "/mq/clients")).await;
    assert_eq!(status_of(&response), "200");
}

#[tokio::test]
async fn unmatched_paths_fall_back_to_404() {
    let (_server, http_addr) = start_server(24154, BrokerConfig::default()).await;

    let response = http_request(&http_addr, get(&http_addr, "/definitely/not/mq")).await;
    assert_eq!(status_of(&response), "404", "response: {}", response);
}
