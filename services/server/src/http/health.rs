use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use notif_protocol::{HealthResponse, LocalConnectionInfo};

use crate::engine::Engine;
use crate::ingestion::{CONSUMER_GROUP, STREAM_KEY};

pub async fn health(State(engine): State<Arc<Engine>>) -> Json<HealthResponse> {
    let redis_status = match engine.coordinator.ping().await {
        Ok(()) => "healthy".to_owned(),
        Err(e) => format!("unhealthy: {e}"),
    };

    let (redis_stream, consumer_group) = if redis_status == "healthy" {
        let stream_status = match engine.coordinator.stream_len(STREAM_KEY).await {
            Ok(len) => format!("healthy (length: {len})"),
            Err(_) => "unavailable".to_owned(),
        };
        let group_status = match engine.coordinator.stream_group_lag(STREAM_KEY, CONSUMER_GROUP).await {
            Ok(Some(lag)) => format!("healthy (lag: {lag})"),
            Ok(None) => "healthy (lag: 0)".to_owned(),
            Err(_) => "unavailable".to_owned(),
        };
        (stream_status, group_status)
    } else {
        ("unavailable".to_owned(), "unavailable".to_owned())
    };

    let all_healthy = redis_status.starts_with("healthy") && redis_stream.starts_with("healthy") && consumer_group.starts_with("healthy");
    let status = if all_healthy { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status,
        instance_id: engine.instance_id.clone(),
        timestamp: Utc::now(),
        redis: redis_status,
        redis_stream,
        consumer_group,
        local_connections: LocalConnectionInfo {
            instance_id: engine.instance_id.clone(),
            total_local_connections: engine.local_connection_count().await,
            local_users: engine.local_user_ids().await,
            connection_times: engine.local_connection_times().await,
        },
    })
}
