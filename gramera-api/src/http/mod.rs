//! HTTP API
//!
//! Health check, read-only presence endpoints and the WebSocket upgrade.

pub mod error;
pub mod health;
pub mod presence;
pub mod websocket;

use std::sync::Arc;

use axum::{http::HeaderValue, routing::get, Router};
use gramera_core::config::ServerConfig;
use gramera_presence::PresenceHub;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<PresenceHub>,
}

/// Create the HTTP router
///
/// Fails when `server.cors_origin` is neither `*` nor a valid origin.
pub fn create_router(hub: Arc<PresenceHub>, server: &ServerConfig) -> gramera_core::Result<Router> {
    let state = AppState { hub };

    let router = Router::new()
        .merge(health::create_health_router())
        .merge(presence::create_presence_router())
        // WebSocket endpoint for presence sessions
        .route("/ws", get(websocket::websocket_handler));

    // Apply layers before state
    let router = router
        .layer(cors_layer(&server.cors_origin)?)
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    Ok(router.with_state(state))
}

fn cors_layer(origin: &str) -> gramera_core::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }

    let origin = HeaderValue::from_str(origin).map_err(|e| {
        gramera_core::Error::Configuration(format!("invalid cors_origin {origin:?}: {e}"))
    })?;
    Ok(layer.allow_origin(origin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use gramera_core::models::{SessionId, UserId};
    use gramera_presence::outbox_channel;
    use serde_json::Value;
    use tower::ServiceExt;

    fn router(hub: &Arc<PresenceHub>) -> Router {
        create_router(hub.clone(), &ServerConfig::default()).unwrap()
    }

    async fn get_json(router: Router, uri: &str) -> Value {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let hub = Arc::new(PresenceHub::default());
        let response = router(&hub)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_presence_lists_identified_sessions() {
        let hub = Arc::new(PresenceHub::default());
        let (tx, _rx) = outbox_channel(8);
        let session_id = SessionId::from("s1");
        hub.lifecycle().open(session_id.clone(), tx.clone()).unwrap();
        hub.lifecycle().open(SessionId::from("s2"), tx).unwrap();
        hub.lifecycle()
            .identify(&session_id, UserId::from("alice"))
            .unwrap();

        let body = get_json(router(&hub), "/api/presence").await;
        assert_eq!(
            body,
            serde_json::json!({
                "online": [{"identity": "alice", "sessionId": "s1"}],
                "count": 1
            })
        );

        let stats = get_json(router(&hub), "/api/presence/stats").await;
        assert_eq!(stats["open_sessions"], 2);
        assert_eq!(stats["identified_sessions"], 1);
        assert_eq!(stats["messages_relayed"], 0);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let hub = Arc::new(PresenceHub::default());
        let response = router(&hub)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_invalid_cors_origin_is_rejected() {
        let hub = Arc::new(PresenceHub::default());
        let server = ServerConfig {
            cors_origin: "bad\norigin".to_string(),
            ..ServerConfig::default()
        };

        assert!(matches!(
            create_router(hub, &server),
            Err(gramera_core::Error::Configuration(_))
        ));
    }
}
