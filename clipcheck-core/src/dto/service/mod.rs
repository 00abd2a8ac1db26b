//! Service discovery DTOs for browser clients

use serde::Serialize;

use crate::language::Language;

/// Body of `GET /api/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub supported_platforms: &'static [&'static str],
}

/// Body of `GET /api/config`
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    /// How often clients should poll a running job
    pub poll_interval_ms: u64,
    pub supported_languages: &'static [Language],
    pub default_language: String,
    pub max_url_length: usize,
}
