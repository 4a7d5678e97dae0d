//! Simple consumer example for the RapidMQ client

use rapidmq_client::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4150".to_string());

    let mut subscriber = ClientBuilder::new(&address)
        .id("example-consumer")
        .subscribe_queue("example")
        .await?;
    println!("subscribed to {} on {}", subscriber.target(), address);

    while let Some(msg) = subscriber.next_message().await? {
        println!("received: {}", String::from_utf8_lossy(msg.body()));
    }

    println!("broker closed the connection");
    Ok(())
}
