//! Authentication endpoints: password, assertion, prolong, logout.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::attesta::error::AuthError;
use crate::attesta::AuthService;
use crate::session::Session;

use super::{clear_session_cookie, session_cookie, session_from_headers, status_for};

#[derive(Debug, Deserialize)]
pub struct AuthenticateUserRequest {
    pub email: String,
    pub pass: String,
    #[serde(default)]
    pub ephemeral: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuthWithAssertionRequest {
    pub assertion: String,
    #[serde(default)]
    pub ephemeral: bool,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
}

/// `POST /wsapi/authenticate_user`
pub async fn authenticate_user(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<AuthenticateUserRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let result = service
        .authenticate_with_password(&request.email, &request.pass, request.ephemeral)
        .await;
    session_response(&service, result)
}

/// `POST /wsapi/auth_with_assertion`
pub async fn auth_with_assertion(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<AuthWithAssertionRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let result = service
        .authenticate_with_assertion(&request.assertion, request.ephemeral)
        .await;
    session_response(&service, result)
}

/// `POST /wsapi/prolong_session`
pub async fn prolong_session(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> impl IntoResponse {
    let session = session_from_headers(&headers);
    let result = service.prolong_session(session.as_ref());
    session_response(&service, result)
}

/// `POST /wsapi/logout`
///
/// Destroys the caller's session by clearing the cookie. The cookie is
/// cleared even when no session was presented.
pub async fn logout(service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    let mut response_headers = HeaderMap::new();
    match clear_session_cookie(service.policy().secure_cookies) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("failed to build logout cookie: {err}"),
    }
    (
        StatusCode::OK,
        response_headers,
        Json(AuthResponse { success: true }),
    )
}

/// Shared tail for every endpoint that may issue a session: on success the
/// cookie carries the encoded session, on failure the body says so.
/// Credential and assertion failures stay deliberately indistinct.
fn session_response(
    service: &AuthService,
    result: Result<Session, AuthError>,
) -> axum::response::Response {
    match result {
        Ok(session) => {
            let mut response_headers = HeaderMap::new();
            match session_cookie(&session, service.policy().secure_cookies) {
                Ok(cookie) => {
                    response_headers.insert(SET_COOKIE, cookie);
                }
                Err(err) => {
                    error!("failed to build session cookie: {err}");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(AuthResponse { success: false }),
                    )
                        .into_response();
                }
            }
            (
                StatusCode::OK,
                response_headers,
                Json(AuthResponse { success: true }),
            )
                .into_response()
        }
        Err(err) => {
            match &err {
                AuthError::InvalidCredentials
                | AuthError::InvalidAssertion
                | AuthError::NoActiveSession => {}
                other => error!("authentication failed: {other}"),
            }
            (status_for(&err), Json(AuthResponse { success: false })).into_response()
        }
    }
}
