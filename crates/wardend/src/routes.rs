//! Router construction for the decision and metrics listeners.

use std::sync::Arc;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use warden_metrics::ForwardAuthMetrics;

use crate::auth::handle_auth;
use crate::health::{health, ready};
use crate::state::AppState;

/// Builds the main router: decision, health, readiness, static assets.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/auth", any(handle_auth))
        .route("/", any(handle_auth))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest_service("/static", static_files)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Builds the metrics router for the separate metrics port.
pub fn create_metrics_router(metrics: ForwardAuthMetrics) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move {
                (
                    [(header::CONTENT_TYPE, ForwardAuthMetrics::content_type())],
                    metrics.encode(),
                )
                    .into_response()
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_router_serves_exposition() {
        let metrics = ForwardAuthMetrics::new();
        metrics.requests().inc_result("allowed");
        let app = create_metrics_router(metrics);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.contains("text/plain"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("forwardauth_requests_total"));
    }

    #[tokio::test]
    async fn test_metrics_router_unknown_path() {
        let app = create_metrics_router(ForwardAuthMetrics::new());

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
