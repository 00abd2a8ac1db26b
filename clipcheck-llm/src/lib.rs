//! Clipcheck LLM Client
//!
//! A small, type-safe HTTP client for an OpenAI-compatible model provider.
//!
//! The client covers the calls the analysis pipeline needs:
//! - Audio transcription (multipart upload)
//! - Responses API, both one-shot and streamed with reasoning summaries
//! - Relaxed JSON extraction from model output
//!
//! # Example
//!
//! ```no_run
//! use clipcheck_llm::{LlmClient, ResponseRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), clipcheck_llm::ClientError> {
//!     let client = LlmClient::new("https://api.openai.com", Some("sk-...".to_string()));
//!     let output = client
//!         .create_response(&ResponseRequest::new("gpt-4.1-mini", "Say hi"))
//!         .await?;
//!     println!("{}", output.text);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod json;
mod responses;
mod transcription;

pub use error::{ClientError, Result};
pub use json::parse_json_relaxed;
pub use responses::{ReasoningOptions, ResponseOutput, ResponseRequest};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for an OpenAI-compatible API
#[derive(Debug, Clone)]
pub struct LlmClient {
    /// Base URL of the provider (e.g., "https://api.openai.com")
    base_url: String,
    /// Bearer token; requests fail with `MissingApiKey` when absent
    api_key: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl LlmClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The provider base URL, without the `/v1` suffix
    /// * `api_key` - API key sent as a bearer token
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(base_url, api_key, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, api_key: Option<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        }
    }

    /// Get the base URL of the provider
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Attach the bearer token to a request
    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let key = self.api_key.as_deref().ok_or(ClientError::MissingApiKey)?;
        Ok(request.bearer_auth(key))
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Turn a non-success status into an `ApiError` carrying the body text
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}
