//! Error handling for the VENTU Rust client

use std::fmt;
use thiserror::Error;
use ventu_rust_auth::{error_message, AuthError};

/// Unified error type for the VENTU Rust client
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session and token errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Non-success response from the API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Create an API error from a status code and a response body
    pub fn api(status: u16, body: &str) -> Self {
        Error::Api {
            status,
            message: error_message(body),
        }
    }

    /// Create a new general error
    pub fn general<T: fmt::Display>(msg: T) -> Self {
        Error::General(msg.to_string())
    }

    /// True when the caller should treat the user as logged out
    pub fn is_session_error(&self) -> bool {
        matches!(self, Error::Auth(e) if e.is_session_error())
    }

    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Auth(AuthError::ApiError { status, .. }) => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message() {
        let err = Error::api(400, r#"{"start_date": ["This field is required."]}"#);
        assert_eq!(err.status(), Some(400));
        assert_eq!(
            err.to_string(),
            "API error (400): start_date: This field is required."
        );
    }

    #[test]
    fn test_session_errors() {
        assert!(Error::from(AuthError::SessionExpired).is_session_error());
        assert!(Error::from(AuthError::Unauthenticated).is_session_error());
        assert!(!Error::general("boom").is_session_error());
        assert!(!Error::api(500, "").is_session_error());
    }
}
