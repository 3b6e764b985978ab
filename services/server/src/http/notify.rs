use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use notif_protocol::{NotificationEnvelope, NotifyDirectResponse, NotifyRequest, NotifyStreamResponse};
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::{AppError, HttpResult};
use crate::ingestion::STREAM_KEY;

fn validate_size(engine: &Engine, message: &serde_json::Value) -> HttpResult<()> {
    let encoded = serde_json::to_vec(message).map_err(|e| AppError::CoordinatorUnavailable(e.to_string()))?;
    if encoded.len() > engine.config.max_message_size {
        return Err(AppError::MessageTooLarge);
    }
    Ok(())
}

pub async fn notify_stream(
    State(engine): State<Arc<Engine>>,
    Path(user_id): Path<String>,
    Json(request): Json<NotifyRequest>,
) -> HttpResult<Json<NotifyStreamResponse>> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::InvalidUser("empty user_id".to_owned()));
    }
    validate_size(&engine, &request.message)?;

    let message_json = serde_json::to_string(&request.message).unwrap_or_default();
    let notification_id = Uuid::new_v4().to_string();
    let timestamp = Utc::now().to_rfc3339();

    let fields = [
        ("user_id", user_id),
        ("message", message_json.as_str()),
        ("type", request.r#type.as_str()),
        ("timestamp", timestamp.as_str()),
        ("notification_id", notification_id.as_str()),
    ];

    let stream_id = engine
        .coordinator
        .stream_add(STREAM_KEY, &fields)
        .await
        .map_err(AppError::from)?;

    Ok(Json(NotifyStreamResponse {
        success: true,
        stream_id,
        message: format!("Notification queued for user {user_id}"),
        delivery_method: "redis_stream",
    }))
}

pub async fn notify_direct(
    State(engine): State<Arc<Engine>>,
    Path(user_id): Path<String>,
    Json(request): Json<NotifyRequest>,
) -> HttpResult<Json<NotifyDirectResponse>> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::InvalidUser("empty user_id".to_owned()));
    }
    validate_size(&engine, &request.message)?;

    let envelope = NotificationEnvelope::new(user_id, request.message);
    let delivered = engine.send_distributed(envelope).await;

    Ok(Json(if delivered {
        NotifyDirectResponse {
            success: true,
            message: "Notification sent",
            delivery_method: "direct_websocket",
        }
    } else {
        NotifyDirectResponse {
            success: false,
            message: "User not connected - stored as pending",
            delivery_method: "direct_websocket",
        }
    }))
}
