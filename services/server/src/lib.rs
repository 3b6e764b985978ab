pub mod config;
pub mod engine;
pub mod errors;
pub mod external_ingress;
pub mod fanout;
pub mod heartbeat;
pub mod http;
pub mod ingestion;
pub mod metrics;
pub mod pending;
pub mod reconnect;
pub mod registry;
pub mod retry_loop;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;

use engine::Engine;

pub fn build_router(engine: Arc<Engine>) -> Router {
    http::build_router(engine)
}

/// Spawns the five background loops named in the design notes, all
/// watching the same shutdown signal.
pub fn spawn_background_loops(engine: Arc<Engine>, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        tokio::spawn(ingestion::run(engine.clone(), shutdown.clone())),
        tokio::spawn(fanout::run(engine.clone(), shutdown.clone())),
        tokio::spawn(external_ingress::run(engine.clone(), shutdown.clone())),
        tokio::spawn(heartbeat::run(engine.clone(), shutdown.clone())),
        tokio::spawn(retry_loop::run(engine, shutdown)),
    ]
}
