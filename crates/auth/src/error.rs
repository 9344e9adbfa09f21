//! Error type for session and token operations

use serde_json::Value;
use thiserror::Error;

/// Errors produced by the session manager
#[derive(Error, Debug)]
pub enum AuthError {
    /// No credentials are stored; the caller should send the user to login.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Credentials existed but could not be refreshed. The session has
    /// already been cleared when this is returned.
    #[error("Session expired")]
    SessionExpired,

    /// `/users/me/` could not be loaded. Non-fatal for the session.
    #[error("Failed to fetch user profile: {0}")]
    ProfileFetchFailed(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Token refresh timed out after {0:?}")]
    RefreshTimeout(std::time::Duration),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl AuthError {
    /// True for the errors after which the user must be treated as logged out
    pub fn is_session_error(&self) -> bool {
        matches!(self, AuthError::Unauthenticated | AuthError::SessionExpired)
    }

    /// Build an `ApiError` from a non-success response body.
    pub(crate) fn api(status: u16, body: &str) -> Self {
        AuthError::ApiError {
            status,
            message: error_message(body),
        }
    }
}

/// Pull a human readable message out of an API error body.
///
/// Order: `non_field_errors[0]`, `detail`, then the first field with its
/// first message (`"email: ..."`). Falls back to the raw body.
pub fn error_message(body: &str) -> String {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return body.to_string(),
    };

    let Some(map) = value.as_object() else {
        return body.to_string();
    };

    if let Some(msg) = map.get("non_field_errors").and_then(first_message) {
        return msg;
    }
    if let Some(detail) = map.get("detail").and_then(Value::as_str) {
        return detail.to_string();
    }
    if let Some((field, msg)) = map
        .iter()
        .find_map(|(field, v)| first_message(v).map(|msg| (field, msg)))
    {
        return format!("{}: {}", field, msg);
    }

    body.to_string()
}

fn first_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}
