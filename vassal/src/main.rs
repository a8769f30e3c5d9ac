//! Vassal - local in-memory SQS emulator

use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vassal::Config;
use vassal_queue::QueueStore;

#[derive(Parser, Debug)]
#[command(name = "vassal")]
#[command(about = "Local in-memory SQS emulator", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "VASSAL_PORT")]
    port: Option<u16>,

    /// IP address to bind to
    #[arg(long, env = "VASSAL_BIND_IP")]
    bind_ip: Option<String>,

    /// External base URL queue URLs are minted under
    #[arg(long, env = "VASSAL_BASE_URL")]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "VASSAL_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "vassal={},tower_http=debug",
                    args.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // File/env configuration, overridden by CLI arguments.
    let mut config = Config::load()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind_ip) = args.bind_ip {
        config.bind_ip = bind_ip;
    }
    if let Some(base_url) = args.base_url {
        config.base_url = Some(base_url);
    }

    let base_url = config.base_url();
    info!("Starting Vassal...");
    info!("  Queue URLs served under {}", base_url);

    let store = QueueStore::new(base_url);
    let app = vassal::router(store.clone());

    let addr: SocketAddr = format!("{}:{}", config.bind_ip, config.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear down every queue so all message timers are cancelled before exit.
    store.reset();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
}
