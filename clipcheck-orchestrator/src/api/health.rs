//! Health Check API Handlers

use axum::{Json, http::StatusCode, response::IntoResponse};
use clipcheck_core::dto::service::HealthResponse;

/// Platforms whose share urls clients may submit
pub const SUPPORTED_PLATFORMS: &[&str] = &["youtube", "instagram", "tiktok", "twitter", "facebook"];

/// GET /health
/// Liveness check; does not touch the job store
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /api/health
/// Connectivity check for browser clients
pub async fn api_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        supported_platforms: SUPPORTED_PLATFORMS,
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::test_support::{app, send};
    use crate::service::fakes::open_store;

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, store, _media, _analysis) = open_store(false);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app(store, false).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_api_health_reports_version_and_platforms() {
        let (_dir, store, _media, _analysis) = open_store(false);
        let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(store, false), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["supported_platforms"].as_array().unwrap().len(), 5);
        assert_eq!(body["supported_platforms"][0], "youtube");
    }
}
