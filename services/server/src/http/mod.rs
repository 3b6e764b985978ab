mod debug;
mod health;
mod notify;
mod stats;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub fn build_router(engine: Arc<Engine>) -> Router {
    let mut router = Router::new()
        .route("/ws/:user_id", get(crate::ws::ws_handler))
        .route("/notify/stream/:user_id", post(notify::notify_stream))
        .route("/notify/direct/:user_id", post(notify::notify_direct))
        .route("/health", get(health::health))
        .route("/stats", get(stats::stats))
        .route("/stats/distributed", get(stats::stats_distributed));

    if engine.config.enable_debug {
        router = router.route("/debug/pending/:user_id", get(debug::pending));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
