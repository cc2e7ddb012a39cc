//! # Control HTTP Server
//!
//! The engine's inbound REST surface:
//!
//! - `PUT /api/v1/notify/registrations` with `{"name": ..., "operation": ...}`
//!   queues a registration change for the coordinator.
//! - `GET /api/v1/ping` answers `pong`.
//!
//! The notify handler waits for room on the bounded update queue, so a busy
//! coordinator slows callers down instead of losing updates.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{NotifyUpdate, UpdateOperation};

pub const NOTIFY_PATH: &str = "/api/v1/notify/registrations";
pub const PING_PATH: &str = "/api/v1/ping";

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("the distribution engine is not accepting updates")]
    Unavailable,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ControlError::MalformedBody(_) => (StatusCode::BAD_REQUEST, "MalformedBody"),
            ControlError::MissingField(_) => (StatusCode::BAD_REQUEST, "MissingField"),
            ControlError::UnknownOperation(_) => (StatusCode::BAD_REQUEST, "UnknownOperation"),
            ControlError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "Unavailable"),
        };
        log::warn!("Rejected registration notification: {}", self);
        (
            status,
            Json(json!({ "error_type": error_type, "message": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Clone)]
struct ControlState {
    updates: mpsc::Sender<NotifyUpdate>,
}

fn required<'a>(body: &'a serde_json::Value, field: &'static str) -> Result<&'a str, ControlError> {
    body.get(field)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ControlError::MissingField(field))
}

/// Parses a notification body.
pub fn parse_notification(body: &[u8]) -> Result<NotifyUpdate, ControlError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ControlError::MalformedBody(e.to_string()))?;
    let name = required(&value, "name")?;
    let operation = required(&value, "operation")?;
    let operation = UpdateOperation::parse(operation)
        .ok_or_else(|| ControlError::UnknownOperation(operation.to_string()))?;
    Ok(NotifyUpdate::new(name, operation))
}

async fn notify_registrations(
    State(state): State<ControlState>,
    body: Bytes,
) -> Result<StatusCode, ControlError> {
    let update = parse_notification(&body)?;
    log::info!(
        "Registration notification: {:?} '{}'",
        update.operation,
        update.name
    );
    state
        .updates
        .send(update)
        .await
        .map_err(|_| ControlError::Unavailable)?;
    Ok(StatusCode::OK)
}

async fn ping() -> &'static str {
    "pong"
}

/// The control router, feeding `updates`.
pub fn router(updates: mpsc::Sender<NotifyUpdate>) -> Router {
    Router::new()
        .route(NOTIFY_PATH, put(notify_registrations))
        .route(PING_PATH, get(ping))
        .with_state(ControlState { updates })
}

/// Serves the control router on `port` until `shutdown` fires.
pub async fn serve(
    port: u16,
    updates: mpsc::Sender<NotifyUpdate>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("Control server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(updates))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Control server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn notify(body: &str) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(NOTIFY_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_notification_is_queued() {
        let (tx, mut rx) = mpsc::channel(2);
        let resp = router(tx)
            .oneshot(notify(r#"{"name":"OSIClient","operation":"update"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            rx.recv().await.unwrap(),
            NotifyUpdate::new("OSIClient", UpdateOperation::Update)
        );
    }

    #[tokio::test]
    async fn test_bad_requests_are_rejected() {
        for body in [
            "{not json",
            r#"{"operation":"add"}"#,
            r#"{"name":"","operation":"add"}"#,
            r#"{"name":"x"}"#,
            r#"{"name":"x","operation":"rename"}"#,
            r#"{"name":7,"operation":"add"}"#,
        ] {
            let (tx, mut rx) = mpsc::channel(2);
            let resp = router(tx).oneshot(notify(body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_closed_queue_is_unavailable() {
        let (tx, rx) = mpsc::channel(2);
        drop(rx);
        let resp = router(tx)
            .oneshot(notify(r#"{"name":"x","operation":"delete"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ping() {
        let (tx, _rx) = mpsc::channel(2);
        let resp = router(tx)
            .oneshot(Request::builder().uri(PING_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"pong");
    }
}
