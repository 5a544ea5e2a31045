use std::collections::BTreeMap;

use thiserror::Error;

/// Why a login or register call failed. The existing session is never touched.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("Passwords do not match")]
    PasswordMismatch,

    /// The server refused the credentials or details (bad password, validation)
    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
        errors: BTreeMap<String, Vec<String>>,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Tokens were issued but could not be persisted
    #[error("Failed to store credentials: {0}")]
    Storage(String),
}

impl AuthError {
    /// Flatten field errors into `field: message` lines for display
    pub fn field_messages(&self) -> Vec<String> {
        match self {
            AuthError::Rejected { errors, .. } => errors
                .iter()
                .flat_map(|(field, messages)| {
                    messages.iter().map(move |m| format!("{}: {}", field, m))
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Outcome of a failed token renewal. `Clone` so a single result can be
/// handed to every request waiting on the same refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The refresh token itself was rejected. Terminal for the session.
    #[error("Refresh token rejected: {0}")]
    Invalid(String),

    /// Network failure, timeout or server unavailability. The refresh token
    /// may still be good.
    #[error("Token refresh unavailable: {0}")]
    Transient(String),
}

impl RefreshError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshError::Invalid(_))
    }
}
