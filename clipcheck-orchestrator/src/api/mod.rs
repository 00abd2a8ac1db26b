//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod job;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::JobStore;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    /// Whether a model API key is configured; analysis is refused without one
    pub api_key_configured: bool,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/api/health", get(health::api_health))
        .route("/api/config", get(config::get_config))
        // Job endpoints
        .route("/api/analyze", post(job::analyze))
        .route("/api/jobs/{id}", get(job::get_job))
        .route("/api/jobs/{id}/thumbnail", get(job::get_thumbnail))
        // History endpoints
        .route("/api/history", get(history::list_history))
        .route("/api/history", delete(history::delete_all_history))
        .route("/api/history/{id}", delete(history::delete_history_item))
        // Add state and middleware
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Browser extensions and the local web UI may call the API
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(|o| {
                o.starts_with("chrome-extension://")
                    || o.starts_with("moz-extension://")
                    || o == "http://localhost:8000"
                    || o == "http://127.0.0.1:8000"
            })
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    pub(crate) fn app(store: Arc<JobStore>, api_key_configured: bool) -> Router {
        create_router(AppState {
            store,
            api_key_configured,
        })
    }

    /// Sends one request and returns the status plus the JSON body, if any
    pub(crate) async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}
