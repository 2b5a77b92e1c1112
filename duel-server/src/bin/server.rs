use anyhow::Context;
use duel_server::config::Config;
use duel_server::node::Node;
use duel_server::shutdown::Shutdown;
use duel_server::transport::router::build_router;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().context("failed to load configuration")?;
    let addr: std::net::SocketAddr = config.addr.parse().context("ADDR must be a valid socket address")?;

    info!(server_id = %config.server_id, addr = %config.addr, "starting node");

    let node = Arc::new(Node::new(config));
    let app_state = node.app_state();
    let router = build_router(app_state);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    node.spawn_background_tasks(Shutdown::new(shutdown_rx));

    let server = axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(());
        });

    server.await.context("server error")?;
    Ok(())
}
