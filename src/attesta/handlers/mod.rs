//! HTTP boundary for the `/wsapi` surface.
//!
//! Handlers stay thin: decode the session cookie, call the service, map the
//! error taxonomy to a status, set the cookie when a session was issued or
//! prolonged.

pub mod auth;
pub mod cert;
pub mod health;
pub mod list_emails;
pub mod stage;

use axum::http::header::{InvalidHeaderValue, COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use tracing::debug;

use crate::session::{Session, SESSION_COOKIE_NAME};

use super::error::AuthError;

/// Decode the session cookie, if one is present and well-formed.
/// Malformed cookies count as "no session"; the client simply re-auths.
pub(crate) fn session_from_headers(headers: &HeaderMap) -> Option<Session> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        // Pairs without '=' are not ours to judge; keep scanning.
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        let (key, val) = (key.trim(), val.trim());
        if key == SESSION_COOKIE_NAME {
            return match Session::decode(val) {
                Ok(session) => Some(session),
                Err(err) => {
                    debug!("discarding malformed session cookie: {err}");
                    None
                }
            };
        }
    }
    None
}

/// Build the `Set-Cookie` header for an issued or prolonged session.
pub(crate) fn session_cookie(
    session: &Session,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = session.duration_ms / 1_000;
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
        session.encode()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Status for errors that reach the wire.
pub(crate) fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials | AuthError::InvalidAssertion => StatusCode::UNAUTHORIZED,
        AuthError::InvalidOrExpiredToken | AuthError::MalformedEmail => StatusCode::BAD_REQUEST,
        AuthError::NoActiveSession => StatusCode::UNAUTHORIZED,
        AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::IssuanceFailed(_) | AuthError::Hashing(_) | AuthError::TokenGeneration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
