//! Job API Handlers
//!
//! HTTP endpoints for submitting videos and polling their jobs.

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use clipcheck_core::domain::job::Job;
use clipcheck_core::dto::job::{AnalyzeRequest, AnalyzeResponse};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

pub const MAX_URL_LENGTH: usize = 2048;

/// POST /api/analyze
/// Find or create the job for a url and make sure it is running
pub async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(ApiError::BadRequest("url is required".to_string()));
    }
    if url.chars().count() > MAX_URL_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "url must be at most {} characters",
            MAX_URL_LENGTH
        )));
    }
    if !state.api_key_configured {
        return Err(ApiError::BadRequest(
            "OPENAI_API_KEY is not set (required for the selected models).".to_string(),
        ));
    }

    tracing::info!("Analyze request for {} (force: {})", url, req.force);

    let (job, cached) = state
        .store
        .find_or_create(url, req.output_language.as_deref(), req.force)
        .await?;

    if !req.force {
        if cached {
            state.store.spawn_ensure_metadata(&job.id);
        } else if let Some(source) = &job.translate_from_job_id {
            state.store.spawn_ensure_metadata(source);
        }
    }

    if !job.status.is_terminal() {
        state.store.run_pipeline(&job.id);
    }

    Ok(Json(AnalyzeResponse {
        is_translation: job.is_translation(),
        job_id: job.id,
        cached,
    }))
}

/// GET /api/jobs/{id}
/// Get job details by ID
pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    let job = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

    Ok(Json(job))
}

/// GET /api/jobs/{id}/thumbnail
/// Serve the cached thumbnail image of a job
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let path = state
        .store
        .thumbnail_path(&id)
        .ok_or_else(|| ApiError::NotFound("Thumbnail not found".to_string()))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("Thumbnail not found".to_string()))?;

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    Ok(([(header::CONTENT_TYPE, content_type.to_string())], bytes))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;

    use crate::api::test_support::{app, send};
    use crate::service::fakes::{open_store, wait_terminal};

    fn analyze_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_analyze_creates_then_caches() {
        let (_dir, store, _media, _analysis) = open_store(false);

        let (status, body) = send(
            app(store.clone(), true),
            analyze_request(json!({ "url": "https://youtu.be/abc", "output_language": "en" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], false);
        assert_eq!(body["is_translation"], false);
        let job_id = body["job_id"].as_str().unwrap().to_string();
        wait_terminal(&store, &job_id).await;

        let (_, again) = send(
            app(store.clone(), true),
            analyze_request(json!({ "url": "https://youtu.be/abc?utm_source=share", "output_language": "en" })),
        )
        .await;
        assert_eq!(again["cached"], true);
        assert_eq!(again["job_id"], job_id.as_str());
    }

    #[tokio::test]
    async fn test_analyze_validates_input() {
        let (_dir, store, _media, _analysis) = open_store(false);

        let (status, body) = send(app(store.clone(), true), analyze_request(json!({ "url": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let long = format!("https://example.com/{}", "a".repeat(2048));
        let (status, _) = send(app(store.clone(), true), analyze_request(json!({ "url": long }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            app(store.clone(), false),
            analyze_request(json!({ "url": "https://youtu.be/abc" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("OPENAI_API_KEY"));
        assert!(store.list_history(50).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_404() {
        let (_dir, store, _media, _analysis) = open_store(false);
        let request = Request::builder().uri("/api/jobs/missing").body(Body::empty()).unwrap();
        let (status, body) = send(app(store, true), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Job not found");
    }

    #[tokio::test]
    async fn test_thumbnail_served_with_content_type() {
        let (_dir, store, _media, _analysis) = open_store(false);
        let (job, _) = store.find_or_create("https://youtu.be/abc", None, false).await.unwrap();
        let media = store.repo.media_dir(&job.id);
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("thumbnail.png"), b"png").unwrap();

        let request = Request::builder()
            .uri(format!("/api/jobs/{}/thumbnail", job.id))
            .body(Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(app(store.clone(), true), request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");

        let (other, _) = store.find_or_create("https://youtu.be/def", None, false).await.unwrap();
        let media = store.repo.media_dir(&other.id);
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("thumbnail.webp"), b"webp").unwrap();
        let request = Request::builder()
            .uri(format!("/api/jobs/{}/thumbnail", other.id))
            .body(Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(app(store.clone(), true), request)
            .await
            .unwrap();
        assert_eq!(response.headers()["content-type"], "image/webp");

        let request = Request::builder()
            .uri("/api/jobs/missing/thumbnail")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app(store, true), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
