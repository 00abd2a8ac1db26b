//! Error types for the LLM client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the model provider
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// The provider reported a failure inside a successful response
    #[error("Model response failed: {0}")]
    ResponseFailed(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// The model produced no usable text
    #[error("Model returned empty output")]
    EmptyOutput,

    /// No API key configured
    #[error("API key is not set")]
    MissingApiKey,

    /// Reading a local file for upload failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ClientError::api_error(429, "slow down").is_client_error());
        assert!(ClientError::api_error(503, "unavailable").is_server_error());
        assert!(!ClientError::EmptyOutput.is_server_error());
    }

    #[test]
    fn test_api_error_message() {
        let err = ClientError::api_error(401, "bad key");
        assert_eq!(err.to_string(), "API error (status 401): bad key");
    }
}
