//! Email listing endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::error;

use crate::attesta::error::AuthError;
use crate::attesta::AuthService;

use super::{session_from_headers, status_for};

/// `GET /wsapi/list_emails`
///
/// Returns the addresses owned by the session's account as
/// `{ "user@example.com": {..properties..}, ... }`. Listing also warms the
/// well-known cache for the returned domains in the background, since the
/// client will typically ask about one of them next.
pub async fn list_emails(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> impl IntoResponse {
    let session = session_from_headers(&headers);
    match service.list_emails(session.as_ref()).await {
        Ok(emails) => (StatusCode::OK, Json(emails)).into_response(),
        Err(err) => {
            if matches!(err, AuthError::StoreUnavailable(_)) {
                error!("listing emails failed: {err}");
            }
            (status_for(&err), err.to_string()).into_response()
        }
    }
}
