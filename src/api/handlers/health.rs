use axum::{
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde_json::json;

// axum handler for health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up")
    ),
    tag = "health"
)]
pub async fn health() -> impl IntoResponse {
    let body = Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }));

    let mut headers = HeaderMap::new();
    if let Ok(value) = format!("{}:{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).parse() {
        headers.insert("X-App", value);
    }

    (headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn health_sets_app_header() {
        let response = health().await.into_response();
        let header = response.headers().get("X-App");
        assert!(header.is_some());
    }
}
