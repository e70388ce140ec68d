//! Traffic journal endpoint.
//!
//! `GET /api/traffic?since_id=N&limit=N&device_id=X&direction=inbound`
//! — recent frames, oldest first, with optional filtering.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traffic::Direction;
use crate::AppState;

#[derive(Deserialize)]
pub struct TrafficQuery {
    /// Return entries with `id > since_id`. Defaults to 0 (all entries).
    #[serde(default)]
    pub since_id: u64,
    /// Defaults to 100, max 500.
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub device_id: Option<String>,
    /// `inbound`, `reply`, `command` or `malformed`. Unknown values are ignored.
    pub direction: Option<String>,
}

fn default_limit() -> usize {
    100
}

pub async fn get_traffic(
    State(state): State<AppState>,
    Query(query): Query<TrafficQuery>,
) -> Json<Value> {
    let direction = query.direction.as_deref().and_then(Direction::from_str_opt);
    let entries = state
        .traffic
        .read_since(
            query.since_id,
            query.limit.min(500),
            query.device_id.as_deref(),
            direction,
        )
        .await;
    Json(json!({ "entries": entries }))
}
