use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use notif_protocol::{DistributedInstanceStats, DistributedStatsResponse, LocalConnectionInfo, StatsResponse};

use crate::engine::Engine;

async fn local_connection_info(engine: &Engine) -> LocalConnectionInfo {
    LocalConnectionInfo {
        instance_id: engine.instance_id.clone(),
        total_local_connections: engine.local_connection_count().await,
        local_users: engine.local_user_ids().await,
        connection_times: engine.local_connection_times().await,
    }
}

pub async fn stats(State(engine): State<Arc<Engine>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        instance_id: engine.instance_id.clone(),
        local_connections: local_connection_info(&engine).await,
        metrics: engine.metrics.snapshot(),
        timestamp: Utc::now(),
    })
}

pub async fn stats_distributed(State(engine): State<Arc<Engine>>) -> Json<DistributedStatsResponse> {
    let entries = engine.registry.all().await;
    let mut by_instance: HashMap<String, DistributedInstanceStats> = HashMap::new();
    for entry in &entries {
        let stats = by_instance.entry(entry.instance_id.clone()).or_insert_with(|| DistributedInstanceStats {
            users: Vec::new(),
            count: 0,
        });
        stats.users.push(entry.user_id.clone());
        stats.count += 1;
    }

    Json(DistributedStatsResponse {
        total_instances: by_instance.len(),
        total_users: entries.len(),
        current_instance: engine.instance_id.clone(),
        by_instance,
        timestamp: Utc::now(),
    })
}
