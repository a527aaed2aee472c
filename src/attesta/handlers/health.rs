//! Health endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::attesta::AuthService;

/// `GET /health`: name, version, and a store liveness probe.
pub async fn health(service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    let store = match service.pool().ping().await {
        Ok(()) => "up",
        Err(err) => {
            error!("store ping failed: {err}");
            "down"
        }
    };

    let body = Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "store": store,
    }));

    let mut headers = HeaderMap::new();
    if let Ok(value) = format!("{}:{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).parse() {
        headers.insert("X-App", value);
    }

    let status = if store == "up" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, headers, body)
}
