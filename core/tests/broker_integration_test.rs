//! End-to-end tests driving a real broker over TCP.

use futures::{SinkExt, StreamExt};
use rapidmq::protocol::{self, FrameCodec, MessageBuilder, MAGIC};
use rapidmq::{BrokerConfig, BrokerServer};
use rapidmq_client::ClientBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// Spawn a broker on an ephemeral port and wait until it is listening.
async fn start_server(mut config: BrokerConfig) -> (Arc<BrokerServer>, String) {
    config.host = "127.0.0.1".to_string();
    config.port = 0;

    let server = Arc::new(BrokerServer::new(config).expect("valid config"));
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    let addr = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(addr) = server.local_addr() {
                break addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server failed to start");

    (server, addr.to_string())
}

#[tokio::test]
async fn queue_round_trip() {
    let (_server, addr) = start_server(BrokerConfig::default()).await;

    let mut publisher = ClientBuilder::new(&addr).to_queue("round-trip").await.unwrap();
    publisher.send("hello").await.unwrap();

    let mut subscriber = ClientBuilder::new(&addr)
        .subscribe_queue("round-trip")
        .await
        .unwrap();
    let msg = timeout(Duration::from_secs(5), subscriber.next_message())
        .await
        .expect("no message within deadline")
        .unwrap()
        .expect("connection stayed open");

    assert_eq!(msg.body(), b"hello");
    publisher.close().await.unwrap();
}

#[tokio::test]
async fn topic_fan_out_reaches_every_subscriber() {
    let (_server, addr) = start_server(BrokerConfig::default()).await;

    let mut first = ClientBuilder::new(&addr)
        .subscribe_topic("fan-out")
        .await
        .unwrap();
    let mut second = ClientBuilder::new(&addr)
        .subscribe_topic("fan-out")
        .await
        .unwrap();

    let mut publisher = ClientBuilder::new(&addr).to_topic("fan-out").await.unwrap();
    publisher.send("x").await.unwrap();

    for subscriber in [&mut first, &mut second] {
        let msg = timeout(Duration::from_secs(5), subscriber.next_message())
            .await
            .expect("no fan-out message within deadline")
            .unwrap()
            .expect("connection stayed open");
        assert_eq!(msg.body(), b"x");
    }
}

#[tokio::test]
async fn slow_topic_subscriber_loses_messages() {
    let config = BrokerConfig {
        default_capacity: 2,
        ..Default::default()
    };
    let (server, addr) = start_server(config).await;

    // Subscribe at the channel level so nothing drains the endpoint.
    let topic = server.broker().get_or_create_topic("firehose");
    let consumer = topic.subscribe();

    let mut publisher = ClientBuilder::new(&addr).to_topic("firehose").await.unwrap();
    for i in 1..=4 {
        publisher.send(format!("{}", i)).await.unwrap();
    }

    timeout(Duration::from_secs(5), async {
        while consumer.delivered() + consumer.discarded() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("publishes never reached the topic");

    assert_eq!(consumer.delivered(), 2);
    assert_eq!(consumer.discarded(), 2);

    assert_eq!(consumer.recv().await.unwrap().body(), b"1");
    assert_eq!(consumer.recv().await.unwrap().body(), b"2");
    assert!(timeout(Duration::from_millis(100), consumer.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn maximum_size_body_round_trips() {
    let (_server, addr) = start_server(BrokerConfig::default()).await;

    let body = vec![b'z'; 65523];
    let mut publisher = ClientBuilder::new(&addr).to_queue("big").await.unwrap();
    publisher.send(&body).await.unwrap();

    let mut subscriber = ClientBuilder::new(&addr).subscribe_queue("big").await.unwrap();
    let msg = timeout(Duration::from_secs(5), subscriber.next_message())
        .await
        .expect("no message within deadline")
        .unwrap()
        .unwrap();

    assert_eq!(msg.body_len(), 65523);
    assert_eq!(msg.body(), body.as_slice());
}

#[tokio::test]
async fn malformed_preamble_is_rejected() {
    let (_server, addr) = start_server(BrokerConfig::default()).await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(b"xxxx").await.unwrap();

    let mut received = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .expect("server never closed the connection")
        .unwrap();

    // At most an error frame comes back; never an application frame.
    if !received.is_empty() {
        assert_eq!(received[0], b'e');
    }
}

#[tokio::test]
async fn protocol_errors_do_not_kill_the_session() {
    let (_server, addr) = start_server(BrokerConfig::default()).await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(&MAGIC).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec);

    // One-token body: malformed, answered with an error frame.
    let mut builder = MessageBuilder::new(protocol::MSG_PUB);
    builder.append(b"queue").unwrap();
    framed.send(builder.build()).await.unwrap();

    let reply = timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("no error reply")
        .unwrap()
        .unwrap();
    assert_eq!(reply.command(), protocol::MSG_ERROR);
    assert!(String::from_utf8_lossy(reply.body()).contains("invalid command"));

    // The same session can still bind.
    let mut builder = MessageBuilder::new(protocol::MSG_PUB);
    builder.append(b"queue recovered").unwrap();
    framed.send(builder.build()).await.unwrap();

    let reply = timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("no ack after recovery")
        .unwrap()
        .unwrap();
    assert_eq!(reply.command(), protocol::MSG_ACK);
}

#[tokio::test]
async fn data_without_binding_is_a_state_error() {
    let (_server, addr) = start_server(BrokerConfig::default()).await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(&MAGIC).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec);

    framed.send(protocol::data_message(b"orphan").unwrap()).await.unwrap();

    let reply = timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("no error reply")
        .unwrap()
        .unwrap();
    assert_eq!(reply.command(), protocol::MSG_ERROR);
    assert_eq!(reply.body(), b"state error.");
}

#[tokio::test]
async fn killed_queue_terminates_its_subscribers() {
    let (_server, addr) = start_server(BrokerConfig::default()).await;

    let mut subscriber = ClientBuilder::new(&addr)
        .subscribe_queue("doomed")
        .await
        .unwrap();

    ClientBuilder::new(&addr).kill_queue("doomed").await.unwrap();

    let outcome = timeout(Duration::from_secs(5), subscriber.next_message())
        .await
        .expect("subscriber never observed the kill");
    match outcome {
        Err(e) => assert!(e.is_broker_error(), "unexpected error: {}", e),
        Ok(None) => {} // Connection torn down before the error frame arrived.
        Ok(Some(msg)) => panic!("unexpected frame: {:?}", msg.command() as char),
    }
}

#[tokio::test]
async fn active_subscription_receives_heartbeats() {
    let config = BrokerConfig {
        noop_interval_ms: 100,
        ..Default::default()
    };
    let (_server, addr) = start_server(config).await;

    let mut subscriber = ClientBuilder::new(&addr)
        .subscribe_topic("quiet")
        .await
        .unwrap();

    let mut noops = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(550);
    while tokio::time::Instant::now() < deadline && noops < 3 {
        match timeout(Duration::from_millis(600), subscriber.next_frame()).await {
            Ok(Ok(Some(frame))) if frame.command() == protocol::MSG_NOOP => noops += 1,
            Ok(Ok(Some(_))) => panic!("unexpected non-heartbeat frame"),
            other => panic!("subscription failed while idle: {:?}", other.is_ok()),
        }
    }
    assert!(noops >= 2, "expected repeated heartbeats, saw {}", noops);
}

#[tokio::test]
async fn client_label_shows_in_the_session_registry() {
    let (server, addr) = start_server(BrokerConfig::default()).await;

    let _publisher = ClientBuilder::new(&addr)
        .id("integration-client")
        .to_queue("labels")
        .await
        .unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            let clients = server.broker().list_clients();
            if clients.iter().any(|c| c.name == "integration-client") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("labelled session never appeared in the registry");
}

#[tokio::test]
async fn shutdown_stops_accepting_connections() {
    let (server, addr) = start_server(BrokerConfig::default()).await;

    // Prove the broker was reachable first.
    let probe = ClientBuilder::new(&addr).to_queue("probe").await;
    assert!(probe.is_ok());

    server.shutdown();

    timeout(Duration::from_secs(5), async {
        loop {
            if ClientBuilder::new(&addr).to_queue("probe").await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("broker kept accepting after shutdown");
}
