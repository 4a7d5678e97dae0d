use clap::Parser;
use rapidmq::{BrokerConfig, BrokerServer, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber;

#[derive(Parser, Debug)]
#[command(name = "rapidmq")]
#[command(about = "A lightweight in-memory message broker")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value = "4150")]
    port: u16,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Heartbeat cadence for active subscriptions, in milliseconds
    #[arg(long, default_value = "1000")]
    noop_interval_ms: u64,

    /// Buffered capacity for queues and per-subscriber topic endpoints
    #[arg(long, default_value = "256")]
    capacity: usize,

    /// Enable the HTTP management façade
    #[arg(long)]
    http: bool,

    #[arg(long, default_value = "4151")]
    http_port: u16,

    /// Path prefix in front of the /mq/... routes
    #[arg(long, default_value = "")]
    http_prefix: String,

    /// Redirect unmatched HTTP paths to this URL instead of answering 404
    #[arg(long)]
    http_redirect_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    info!("starting rapidmq broker on {}:{}", args.host, args.port);
    info!("noop interval: {}ms", args.noop_interval_ms);
    info!("channel capacity: {}", args.capacity);
    if args.http {
        info!("http facade port: {}", args.http_port);
    } else {
        info!("http facade: disabled");
    }

    let config = BrokerConfig {
        host: args.host,
        port: args.port,
        noop_interval_ms: args.noop_interval_ms,
        default_capacity: args.capacity,
        http_enabled: args.http,
        http_port: args.http_port,
        http_prefix: args.http_prefix,
        http_redirect_url: args.http_redirect_url,
        ..Default::default()
    };

    let server = std::sync::Arc::new(BrokerServer::new(config)?);

    let run_server = std::sync::Arc::clone(&server);
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = run_server.run().await {
            error!("server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received ctrl-c, shutting down gracefully...");
            server.shutdown();
            let _ = (&mut server_handle).await;
        }
        _ = &mut server_handle => {
            info!("server task completed");
        }
    }

    info!("rapidmq shut down");
    Ok(())
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
