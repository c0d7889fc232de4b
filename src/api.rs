// src/api.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::config::ConfigLoader;
use crate::handler::{handle, InvocationEvent};
use crate::storage::ObjectStore;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub config: ConfigLoader,
}

impl AppState {
    pub fn new(store: Arc<dyn ObjectStore>, config: ConfigLoader) -> Self {
        Self { store, config }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/invoke", post(invoke))
        .with_state(state)
}

pub use create_router as router;

/// Caller-supplied request id, or a fresh v4 uuid.
fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

async fn invoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event: InvocationEvent = if body.iter().all(u8::is_ascii_whitespace) {
        InvocationEvent::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(e) => e,
            Err(e) => {
                let msg = serde_json::json!({ "message": format!("invalid invocation event: {e}") });
                return (StatusCode::BAD_REQUEST, Json(msg)).into_response();
            }
        }
    };
    let cid = correlation_id(&headers);

    let resp = handle(&event, (state.config)(), state.store.clone(), &cid).await;
    let status = StatusCode::from_u16(resp.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut out = if status == StatusCode::NO_CONTENT {
        status.into_response()
    } else {
        (status, Json(resp)).into_response()
    };
    if let Ok(v) = cid.parse() {
        out.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_header_is_reused() {
        let mut h = HeaderMap::new();
        h.insert(REQUEST_ID_HEADER, "req-42".parse().unwrap());
        assert_eq!(correlation_id(&h), "req-42");

        let fresh = correlation_id(&HeaderMap::new());
        assert!(uuid::Uuid::parse_str(&fresh).is_ok());
    }
}
