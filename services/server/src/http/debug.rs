use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use notif_protocol::PendingEntry;

use crate::engine::Engine;

/// Raw pending-queue contents for one user. Only routed when
/// `ENABLE_DEBUG` is set; entries that fail to parse are silently
/// skipped rather than surfaced, matching the store's own read-side
/// malformed-entry handling.
pub async fn pending(State(engine): State<Arc<Engine>>, Path(user_id): Path<String>) -> Json<Vec<PendingEntry>> {
    let entries = engine.pending.read_all(&user_id).await;
    Json(entries.into_iter().map(|(_, entry)| entry).collect())
}
