//! Error types for the Pendo API boundary.
//!
//! Orchestration code propagates with `anyhow`; the HTTP client returns
//! `ApiError` so callers can tell a bad key from a timeout or a 4xx body.

use thiserror::Error;

/// Maximum number of body characters kept when the error body isn't JSON.
const BODY_PREVIEW_CHARS: usize = 200;

/// Errors raised while talking to the Pendo API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No integration key was configured.
    #[error("API key is required. Set PENDO_API_KEY or pass --api-key")]
    MissingApiKey,

    #[error("API key contains characters not allowed in an HTTP header")]
    InvalidApiKey,

    /// The request exceeded the configured timeout.
    #[error("Request to {endpoint} timed out after {seconds}s")]
    Timeout { endpoint: String, seconds: u64 },

    /// The API host could not be reached.
    #[error("Cannot connect to Pendo API at {base_url}")]
    Connect { base_url: String },

    /// Any other transport failure.
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not valid JSON.
    #[error("Failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Build a status error from a response body.
    ///
    /// JSON bodies contribute their `message` (or `error`) field; anything
    /// else is truncated to a short preview.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| {
                ["message", "error"]
                    .iter()
                    .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(String::from))
            })
            .unwrap_or_else(|| body.chars().take(BODY_PREVIEW_CHARS).collect());

        ApiError::Status { status, message }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_uses_json_message() {
        let err = ApiError::from_status(403, r#"{"message": "invalid integration key"}"#);
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "HTTP 403: invalid integration key");
    }

    #[test]
    fn test_status_falls_back_to_error_field() {
        let err = ApiError::from_status(400, r#"{"error": "bad pipeline"}"#);
        assert_eq!(err.to_string(), "HTTP 400: bad pipeline");
    }

    #[test]
    fn test_status_truncates_plain_body() {
        let body = "x".repeat(500);
        let err = ApiError::from_status(502, &body);
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message.len(), 200);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_status_errors_have_no_code() {
        assert_eq!(ApiError::MissingApiKey.status(), None);
    }
}
