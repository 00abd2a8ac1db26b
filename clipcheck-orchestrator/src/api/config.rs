//! Client Configuration API Handler

use axum::{Json, extract::State};
use clipcheck_core::dto::service::ClientConfig;
use clipcheck_core::language::SUPPORTED_LANGUAGES;

use crate::api::AppState;
use crate::api::job::MAX_URL_LENGTH;

/// Poll interval suggested to clients watching a job
pub const POLL_INTERVAL_MS: u64 = 2000;

/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(ClientConfig {
        poll_interval_ms: POLL_INTERVAL_MS,
        supported_languages: SUPPORTED_LANGUAGES,
        default_language: state.store.resolve_language(None),
        max_url_length: MAX_URL_LENGTH,
    })
}
