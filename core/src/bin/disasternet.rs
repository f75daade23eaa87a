use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use disasternet_core::{init_logger, ChatNode, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level);

    info!("Starting DisasterNet backend...");
    let settings = cli.into_settings();
    let port = settings.http_port;

    let node = ChatNode::start(settings)
        .await
        .context("failed to start P2P node")?;

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind HTTP port {port}"))?;
    info!("DisasterNet API is listening on http://localhost:{port}");

    let served = axum::serve(listener, node.router())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = node.shutdown().await {
        error!("P2P node did not stop cleanly: {e}");
    }
    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Received ctrl-c, shutting down");
}
