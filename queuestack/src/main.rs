//! QueueStack - in-memory message queue server
//!
//! Hosts standard and FIFO queues with visibility timeouts, long polling
//! and deduplication behind a small JSON REST API.

mod config;
mod handlers;
mod router;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use queuestack_sqs::{EngineConfig, SqsState};

#[derive(Parser, Debug)]
#[command(name = "queuestack")]
#[command(about = "In-memory message queue server", long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "QUEUESTACK_PORT")]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long, env = "QUEUESTACK_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "QUEUESTACK_LOG_LEVEL")]
    log_level: String,

    /// Path to a config file
    #[arg(short, long, env = "QUEUESTACK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("queuestack={},tower_http=debug", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if config.engine.base_url == EngineConfig::default().base_url {
        config.engine.base_url = format!("http://localhost:{}/queues", config.server.port);
    }

    info!("Starting QueueStack...");
    info!(
        visibility_timeout_secs = config.engine.default_visibility_timeout_secs,
        dedup_window_secs = config.engine.dedup_window_secs,
        sweep_interval_ms = config.engine.sweep_interval_ms,
        "Engine configured"
    );

    let state = Arc::new(SqsState::new(config.engine));
    state.start_scheduler();

    let app = router::create_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
