use std::sync::Arc;

use notif_coordinator::RedisCoordinator;
use server::config::Config;
use server::engine::Engine;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = Config::from_env();
    info!(instance_id = %config.instance_id, redis_url = %config.redis_url, "starting notification fabric");

    let coordinator = match RedisCoordinator::connect(&config.redis_url).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!(error = %e, "failed to connect to coordinator, exiting");
            std::process::exit(1);
        }
    };

    let bind_addr = config.bind_addr.clone();
    let instance_id = config.instance_id.clone();
    let engine = Arc::new(Engine::new(config, Arc::new(coordinator)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = server::spawn_background_loops(engine.clone(), shutdown_rx.clone());

    let router = server::build_router(engine.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "server listening");

    // Fire the shutdown watch the instant the OS signal arrives, so the
    // background loops start draining in parallel with axum's own graceful
    // shutdown rather than waiting behind it.
    let mut axum_shutdown_rx = shutdown_rx;
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(true);
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = axum_shutdown_rx.changed().await;
        })
        .await
        .expect("server error");

    for handle in background {
        let _ = handle.await;
    }

    engine.registry.remove_for_instance(&instance_id).await;
    info!("server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
