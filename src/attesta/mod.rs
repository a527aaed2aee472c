//! Server bootstrap and the `/wsapi` router.

pub mod error;
pub mod handlers;
pub mod password;
pub mod service;

pub use error::AuthError;
pub use service::{AuthService, ServicePolicy};

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the application router.
#[must_use]
pub fn router(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/wsapi/list_emails", get(handlers::list_emails::list_emails))
        .route(
            "/wsapi/authenticate_user",
            post(handlers::auth::authenticate_user),
        )
        .route(
            "/wsapi/auth_with_assertion",
            post(handlers::auth::auth_with_assertion),
        )
        .route("/wsapi/stage_user", post(handlers::stage::stage_user))
        .route(
            "/wsapi/complete_user_creation",
            post(handlers::stage::complete_user_creation),
        )
        .route("/wsapi/stage_reset", post(handlers::stage::stage_reset))
        .route("/wsapi/complete_reset", post(handlers::stage::complete_reset))
        .route(
            "/wsapi/prolong_session",
            post(handlers::auth::prolong_session),
        )
        .route("/wsapi/cert_key", post(handlers::cert::cert_key))
        .route("/wsapi/logout", post(handlers::auth::logout))
        .route("/health", get(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Ulid::new().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(service)),
        )
}

/// Start the server and serve until interrupted, then drain the pool.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn new(port: u16, service: Arc<AuthService>) -> Result<()> {
    let app = router(Arc::clone(&service));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;
    info!("Listening on [::]:{port}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    // One drain, one report. Close failures are logged, not propagated; the
    // process is exiting either way.
    if let Err(err) = service.pool().shutdown().await {
        error!("pool shutdown reported an error: {err}");
    } else {
        info!("pool drained");
    }

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
