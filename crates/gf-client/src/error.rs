//! Error types for gf-client

use thiserror::Error;

/// Result type alias using gf-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the chat backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (network, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status and a structured error body
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Server answered with a non-success status and no usable body
    #[error("Request failed with status {0}")]
    Status(u16),

    /// Credentials missing, expired or rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A required endpoint or setting is missing
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Server-sent events transport error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Map a non-success status plus an optional server message to an error
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        match (status, message) {
            (401 | 403, Some(message)) => Error::Unauthorized(message),
            (401 | 403, None) => Error::Unauthorized(format!("status {}", status)),
            (_, Some(message)) => Error::api(status, message),
            (_, None) => Error::Status(status),
        }
    }

    /// Check if this error means the session credentials are no longer valid
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Error::Unauthorized(_) => true,
            Error::Http(e) => e
                .status()
                .is_some_and(|s| s.as_u16() == 401 || s.as_u16() == 403),
            _ => false,
        }
    }

    /// Check if this error is likely to go away on the next attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Sse(_) => true,
            Error::Status(code) | Error::Api { status: code, .. } => {
                *code == 429 || (500..600).contains(code)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_unauthorized() {
        let e = Error::from_status(401, Some("token expired".into()));
        assert!(matches!(e, Error::Unauthorized(ref m) if m == "token expired"));
        assert!(e.is_unauthorized());

        let e = Error::from_status(403, None);
        assert!(e.is_unauthorized());
    }

    #[test]
    fn test_from_status_structured_message() {
        let e = Error::from_status(422, Some("language not supported".into()));
        assert!(matches!(e, Error::Api { status: 422, .. }));
        assert_eq!(e.to_string(), "API error (422): language not supported");
    }

    #[test]
    fn test_from_status_without_body() {
        let e = Error::from_status(502, None);
        assert!(matches!(e, Error::Status(502)));
        assert!(e.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Sse("connection reset".into()).is_transient());
        assert!(Error::api(503, "overloaded").is_transient());
        assert!(Error::api(429, "slow down").is_transient());
        assert!(!Error::api(400, "bad request").is_transient());
        assert!(!Error::Unauthorized("nope".into()).is_transient());
        assert!(!Error::NotConfigured("summary endpoint".into()).is_transient());
    }
}
