//! HTTP surface: router assembly, middleware stack and server startup.

use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod context;
pub mod handlers;
pub mod state;

pub use state::{ApiConfig, AppState};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::logout_all,
        handlers::auth::session,
        handlers::security::events,
        handlers::security::unblock,
    ),
    components(schemas(
        handlers::types::LoginRequest,
        handlers::types::TokenPairResponse,
        handlers::types::RefreshRequest,
        handlers::types::SessionResponse,
        handlers::types::RevokeAllResponse,
        handlers::types::UnblockRequest,
        crate::principal::Role,
        crate::principal::Permission,
    )),
    tags(
        (name = "auth", description = "Session lifecycle"),
        (name = "security", description = "Security monitoring and response"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

/// OpenAPI document as pretty-printed JSON.
///
/// # Errors
/// Returns an error when serialization fails.
pub fn openapi() -> Result<String> {
    Ok(ApiDoc::openapi().to_pretty_json()?)
}

/// All documented routes, with the middleware stack and shared state applied.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route("/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route("/v1/auth/session", get(handlers::auth::session))
        .route("/v1/security/events", get(handlers::security::events))
        .route("/v1/security/unblock", post(handlers::security::unblock))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server.
///
/// # Errors
/// Returns an error when the listener cannot bind or the server exits
/// abnormally.
pub async fn serve(port: u16, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

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
