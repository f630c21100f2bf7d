//! Read-only views of the presence set

use axum::{extract::State, routing::get, Json, Router};
use gramera_presence::{PresenceEntry, PresenceStats};
use serde::Serialize;

use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct OnlineResponse {
    pub online: Vec<PresenceEntry>,
    pub count: usize,
}

pub fn create_presence_router() -> Router<AppState> {
    Router::new()
        .route("/api/presence", get(list_online))
        .route("/api/presence/stats", get(presence_stats))
}

/// Everyone currently online
pub async fn list_online(State(state): State<AppState>) -> Json<OnlineResponse> {
    let online = state.hub.online();
    Json(OnlineResponse {
        count: online.len(),
        online,
    })
}

pub async fn presence_stats(State(state): State<AppState>) -> Json<PresenceStats> {
    Json(state.hub.stats())
}
