use anyhow::Result;
use clap::Parser;
use corral::{ControlPlane, CorralConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;

#[derive(Parser, Debug, Clone)]
#[command(name = "corral-server")]
#[command(about = "Corral cluster-orchestration control plane")]
#[command(version)]
struct Args {
    /// Configuration file path (env: CORRAL_CONFIG_PATH)
    #[arg(short, long, default_value = "corral.toml", env = "CORRAL_CONFIG_PATH")]
    config: String,

    /// Address to bind, overriding the config file (env: CORRAL_BIND_ADDR)
    #[arg(long, env = "CORRAL_BIND_ADDR")]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CorralConfig::load_or_create(Path::new(&args.config))?;
    let addr = args
        .bind_addr
        .unwrap_or_else(|| config.server.bind_addr.clone());

    tracing::info!(
        "Starting corral-server (heartbeat timeout {}s, repair interval {}s)",
        config.heartbeat_timeout_seconds,
        config.repair_interval_seconds
    );

    let control = Arc::new(ControlPlane::new(config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = control.spawn_background_tasks(shutdown_rx);

    let app = routes::router(control.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Wind down: stop loops and emitters, then give the tasks a moment
    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    control.shutdown().await;
    for task in background {
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            tracing::warn!("Background task did not stop in time");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
