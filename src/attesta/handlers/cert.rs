//! Certificate issuance endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::attesta::error::AuthError;
use crate::attesta::AuthService;

use super::{session_from_headers, status_for};

#[derive(Debug, Deserialize)]
pub struct CertKeyRequest {
    pub email: String,
    pub pubkey: String,
    /// Requested certificate lifetime; defaults from `ephemeral` when absent.
    pub duration: Option<u64>,
    #[serde(default)]
    pub ephemeral: bool,
}

#[derive(Debug, Serialize)]
pub struct CertKeyResponse {
    pub cert: String,
}

/// `POST /wsapi/cert_key`
pub async fn cert_key(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<CertKeyRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let session = session_from_headers(&headers);
    match service
        .cert_key(
            session.as_ref(),
            &request.email,
            &request.pubkey,
            request.duration,
            request.ephemeral,
        )
        .await
    {
        Ok(signed) => (StatusCode::OK, Json(CertKeyResponse { cert: signed.token }))
            .into_response(),
        Err(err) => {
            if matches!(err, AuthError::IssuanceFailed(_) | AuthError::StoreUnavailable(_)) {
                error!("certificate issuance failed: {err}");
            }
            (status_for(&err), err.to_string()).into_response()
        }
    }
}
