use thiserror::Error;

use crate::models::envelope::ErrorBody;

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401 that could not be recovered: no refresh token, or the refresh was
    /// unavailable. The session is left intact so a later request can retry.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The refresh token was rejected and the session has been torn down
    #[error("Session expired - please log in again")]
    SessionExpired,

    /// A replayed request was rejected again after a successful refresh
    #[error("{method} {path} still unauthorized after token refresh")]
    ReplayExhausted { method: String, path: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Server message from the envelope if there is one, otherwise the raw body
    pub(crate) fn describe_body(body: &str) -> String {
        ErrorBody::parse(body)
            .summary()
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let described = Self::describe_body(body);
        match status.as_u16() {
            400 | 422 => ApiError::BadRequest(described),
            401 => ApiError::Unauthorized(described),
            403 => ApiError::AccessDenied(described),
            404 => ApiError::NotFound(described),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(described),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, described)),
        }
    }

    /// True for every outcome that means "you are not (or no longer) signed in"
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized(_) | ApiError::SessionExpired | ApiError::ReplayExhausted { .. }
        )
    }
}
