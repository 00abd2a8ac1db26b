//! Job DTOs exchanged with API clients

use serde::{Deserialize, Serialize};

/// Request to analyze a video URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub url: String,
    /// Empty or missing means the server's default language
    #[serde(default)]
    pub output_language: Option<String>,
    /// Skip the cache and run a fresh analysis
    #[serde(default)]
    pub force: bool,
}

/// Response to an analyze request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub job_id: String,
    pub cached: bool,
    pub is_translation: bool,
}

/// Response to a history deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_request_defaults() {
        let req: AnalyzeRequest = serde_json::from_str(r#"{"url": "https://youtu.be/x"}"#).unwrap();
        assert_eq!(req.output_language, None);
        assert!(!req.force);
    }
}
