use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::RefreshError;
use crate::api::ApiError;
use crate::models::{ApiEnvelope, RefreshPayload};

/// Renewal endpoint, relative to the API base URL
const REFRESH_PATH: &str = "/auth/refresh/";

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Exchanges a refresh token for a new access token.
///
/// Holds no session state and never writes credentials; the caller decides
/// what to do with the result.
#[derive(Clone)]
pub struct TokenRefresher {
    client: Client,
    url: String,
}

impl TokenRefresher {
    /// `client` is shared with the API client (reqwest::Client is an Arc internally)
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH),
        }
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<String, RefreshError> {
        debug!("Requesting access token renewal");

        let response = self
            .client
            .post(&self.url)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Token refresh request failed");
                RefreshError::Transient(format!("Failed to reach refresh endpoint: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = Self::classify_failure(status, &body);
            warn!(%status, terminal = error.is_terminal(), "Token refresh rejected");
            return Err(error);
        }

        let envelope: ApiEnvelope<RefreshPayload> = response.json().await.map_err(|e| {
            RefreshError::Transient(format!("Failed to parse refresh response: {}", e))
        })?;

        envelope
            .into_data()
            .and_then(|payload| payload.access)
            .filter(|access| !access.is_empty())
            .ok_or_else(|| {
                RefreshError::Invalid("Refresh response did not contain an access token".to_string())
            })
    }

    /// Anything the server says about the token itself is terminal;
    /// anything about the server's own health is not.
    fn classify_failure(status: StatusCode, body: &str) -> RefreshError {
        let detail = format!("{} {}", status, ApiError::describe_body(body));
        match status {
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                RefreshError::Transient(detail)
            }
            s if s.is_server_error() => RefreshError::Transient(detail),
            s if s.is_client_error() => RefreshError::Invalid(detail),
            _ => RefreshError::Transient(detail),
        }
    }
}
