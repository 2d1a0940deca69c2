// ctlstream - Real-time Certificate Transparency log streaming

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ctlstream::monitor::{LogMonitor, MonitorConfig};
use ctlstream::{server, Args, Hub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - respect RUST_LOG environment variable
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let args = Args::parse();

    // Root of the cancellation tree; SIGINT/SIGTERM cancel it.
    let root = CancellationToken::new();
    let signal_token = root.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let (hub, ingress) = Hub::new();
    tokio::spawn(Arc::clone(&hub).run(ingress, root.clone()));

    let config = MonitorConfig {
        nocert: args.nocert,
        log_list_url: args.log_list_url.clone(),
        ..Default::default()
    };
    let monitor = Arc::new(LogMonitor::new(Arc::clone(&hub), config, root.clone())?);
    monitor
        .start()
        .await
        .context("failed to start log monitor")?;

    let app = server::router(Arc::clone(&hub), root.clone());
    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    info!("listening on {}", args.listen);

    let shutdown = root.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
