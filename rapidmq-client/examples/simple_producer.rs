//! Simple producer example for the RapidMQ client

use rapidmq_client::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4150".to_string());

    let mut publisher = ClientBuilder::new(&address)
        .id("example-producer")
        .to_queue("example")
        .await?;
    println!("connected to {} as {}", address, publisher.target());

    for i in 0..10 {
        let body = format!("message #{}", i);
        publisher.send(&body).await?;
        println!("sent: {}", body);
    }

    publisher.close().await?;
    println!("done; run the simple_consumer example to read these messages");
    Ok(())
}
