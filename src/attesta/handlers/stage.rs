//! Staged-action endpoints: account creation and password reset.
//!
//! Staging returns 200 without the token; delivery of the single-use token
//! (normally an email link) is the mailer's job, out of band. Completion
//! consumes the token.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::attesta::error::AuthError;
use crate::attesta::AuthService;

use super::status_for;

#[derive(Debug, Deserialize)]
pub struct StageUserRequest {
    pub email: String,
    pub pass: String,
    pub site: String,
}

#[derive(Debug, Deserialize)]
pub struct StageResetRequest {
    pub email: String,
    pub site: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteUserCreationRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteResetRequest {
    pub pass: String,
    pub token: String,
}

/// `POST /wsapi/stage_user`
pub async fn stage_user(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<StageUserRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service
        .stage_user(&request.email, &request.pass, &request.site)
        .await
    {
        Ok(_token) => {
            debug!("staged account creation for {}", request.email);
            StatusCode::OK.into_response()
        }
        Err(err) => stage_error(&err),
    }
}

/// `POST /wsapi/stage_reset`
pub async fn stage_reset(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<StageResetRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service.stage_reset(&request.email, &request.site).await {
        Ok(_token) => {
            debug!("staged password reset for {}", request.email);
            StatusCode::OK.into_response()
        }
        Err(err) => stage_error(&err),
    }
}

/// `POST /wsapi/complete_user_creation`
pub async fn complete_user_creation(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<CompleteUserCreationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service.complete_user_creation(&request.token).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => completion_error(&err),
    }
}

/// `POST /wsapi/complete_reset`
///
/// Never touches the caller's session; an active session keeps its duration.
pub async fn complete_reset(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<CompleteResetRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service.complete_reset(&request.pass, &request.token).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => completion_error(&err),
    }
}

fn stage_error(err: &AuthError) -> axum::response::Response {
    if !matches!(err, AuthError::InvalidCredentials) {
        error!("staging failed: {err}");
    }
    (status_for(err), err.to_string()).into_response()
}

fn completion_error(err: &AuthError) -> axum::response::Response {
    if !matches!(err, AuthError::InvalidOrExpiredToken) {
        error!("staged completion failed: {err}");
    }
    (status_for(err), err.to_string()).into_response()
}
