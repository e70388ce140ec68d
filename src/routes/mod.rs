//! Admin HTTP route handlers.
//!
//! Each sub-module corresponds to an endpoint group. All handlers except
//! [`health`] sit behind [`crate::auth::require_api_key`].

pub mod devices;
pub mod health;
pub mod sessions;
pub mod traffic;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, ApiKey};
use crate::AppState;

/// Error half of every fallible handler.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>, code: &str) -> ApiError {
    (status, Json(json!({"error": message.into(), "code": code})))
}

/// Build the admin router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health::health));

    let authed_routes = Router::new()
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/devices", get(devices::list_devices))
        .route("/api/devices/{id}", get(devices::get_device))
        .route("/api/devices/{id}/server", post(devices::change_server))
        .route("/api/devices/{id}/status", post(devices::status_check))
        .route("/api/devices/{id}/locate", post(devices::locate))
        .route("/api/traffic", get(traffic::get_traffic))
        .layer(middleware::from_fn(auth::require_api_key));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        .layer(ConcurrencyLimitLayer::new(
            state.config.server.max_connections.max(1),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::records::{Contact, DeviceRecordSink};
    use crate::registry::ConnectionHandle;

    const KEY: &str = "test-key";

    fn state() -> AppState {
        let mut config = Config::default();
        config.auth.api_key = KEY.to_string();
        AppState::new(config)
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {KEY}"));
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(state.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn connect(state: &AppState, device_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(4);
        let peer: SocketAddr = "198.51.100.4:33000".parse().unwrap();
        state
            .registry
            .set(device_id, ConnectionHandle::new(11, peer, "3G".into(), tx))
            .await;
        rx
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let state = state();
        let resp = router(state)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_required() {
        let state = state();
        let resp = router(state.clone())
            .oneshot(Request::get("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router(state)
            .oneshot(
                Request::get("/api/sessions")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let state = state();
        let _rx = connect(&state, "8800000015").await;
        let (status, body) = call(&state, "GET", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["sessions"][0]["device_id"], "8800000015");
        assert_eq!(body["sessions"][0]["peer"], "198.51.100.4:33000");
    }

    #[tokio::test]
    async fn test_change_server_sends_frame() {
        let state = state();
        let mut rx = connect(&state, "D").await;
        let (status, body) = call(
            &state,
            "POST",
            "/api/devices/D/server",
            Some(json!({"ip": "148.230.83.171", "port": 6808})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["frame"], "[3G*D*0022*IP,148.230.83.171,6808]");
        assert_eq!(
            rx.recv().await.as_deref(),
            Some("[3G*D*0022*IP,148.230.83.171,6808]")
        );
    }

    #[tokio::test]
    async fn test_status_and_locate() {
        let state = state();
        let mut rx = connect(&state, "D").await;
        let (status, _) = call(&state, "POST", "/api/devices/D/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx.recv().await.as_deref(), Some("[3G*D*0002*TS]"));

        let (status, _) = call(&state, "POST", "/api/devices/D/locate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx.recv().await.as_deref(), Some("[3G*D*0002*CR]"));
    }

    #[tokio::test]
    async fn test_command_to_absent_device_is_404() {
        let state = state();
        let (status, body) = call(&state, "POST", "/api/devices/ghost/locate", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "DEVICE_NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_change_server_rejects_bad_ip() {
        let state = state();
        let _rx = connect(&state, "D").await;
        let (status, body) = call(
            &state,
            "POST",
            "/api/devices/D/server",
            Some(json!({"ip": "nope", "port": 6808})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_device_records() {
        let state = state();
        state
            .records
            .upsert(Contact {
                device_id: "D".into(),
                addr: "198.51.100.4:33000".parse().unwrap(),
                connected: true,
                keyword: Some("LK".into()),
            })
            .await
            .unwrap();

        let (status, body) = call(&state, "GET", "/api/devices", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devices"][0]["device_id"], "D");

        let (status, body) = call(&state, "GET", "/api/devices/D", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], true);
        assert_eq!(body["online"], false);

        let (status, _) = call(&state, "GET", "/api/devices/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traffic_query() {
        let state = state();
        let _rx = connect(&state, "D").await;
        call(&state, "POST", "/api/devices/D/status", None).await;

        let (status, body) = call(&state, "GET", "/api/traffic?device_id=D&direction=command", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"][0]["frame"], "[3G*D*0002*TS]");

        let (_, body) = call(&state, "GET", "/api/traffic?device_id=other", None).await;
        assert_eq!(body["entries"].as_array().map(Vec::len), Some(0));
    }
}
