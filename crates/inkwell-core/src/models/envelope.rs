use std::collections::BTreeMap;

use serde::Deserialize;

use super::UserProfile;

/// Wrapper the server puts around every JSON response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

impl<T> ApiEnvelope<T> {
    /// Take the payload, or `None` if the server answered without one
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

/// Error-shaped body: message plus per-field validation errors.
/// Validation failures may also come back as a bare `{field: [msg]}` map.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// Best human-readable summary of the failure
    pub fn summary(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.detail.clone())
            .filter(|m| !m.trim().is_empty())
    }
}

/// `data` of a login or register response
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    pub user: UserProfile,
    pub access: String,
    pub refresh: String,
}

/// `data` of a refresh response
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshPayload {
    #[serde(default)]
    pub access: Option<String>,
}
