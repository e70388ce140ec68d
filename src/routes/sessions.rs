//! `GET /api/sessions` — live device sessions.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.registry.list().await;
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}
