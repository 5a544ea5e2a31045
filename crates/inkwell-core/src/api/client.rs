//! API client for the notes server.
//!
//! Every call goes through `ApiClient::send`, which attaches the session's
//! current bearer token at dispatch time and hands 401s to the failure
//! coordinator. Non-authentication errors pass through untouched.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::request::{Attempt, RequestSpec};
use super::ApiError;
use crate::auth::coordinator::{FailureCoordinator, Recovery};
use crate::auth::refresher::TokenRefresher;
use crate::auth::Session;
use crate::models::ApiEnvelope;

/// Credentials one attempt went out with
struct Dispatched {
    token: Option<String>,
    generation: u64,
}

/// API client bound to one session.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    session: Arc<Session>,
    coordinator: Arc<FailureCoordinator>,
}

impl ApiClient {
    /// Create a new API client for `base_url` (e.g. `http://localhost:8000/api`)
    pub fn new(base_url: &str, timeout: Duration, session: Arc<Session>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        let base_url = base_url.trim_end_matches('/');
        let refresher = TokenRefresher::new(client.clone(), base_url);
        let coordinator = Arc::new(FailureCoordinator::new(Arc::clone(&session), refresher));

        Ok(Self {
            client,
            base_url: Arc::from(base_url),
            session,
            coordinator,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<FailureCoordinator> {
        &self.coordinator
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the session's current access token, if any.
    /// Returns the token used and the session generation it belongs to, so a
    /// 401 can be matched against later refreshes and logins.
    fn authorize(&self, builder: RequestBuilder) -> (RequestBuilder, Dispatched) {
        let (token, generation) = self.session.bearer();
        let builder = match token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        };
        (builder, Dispatched { token, generation })
    }

    /// Build and send one attempt of `spec`
    async fn dispatch(&self, spec: &RequestSpec) -> Result<(Response, Dispatched), ApiError> {
        let mut builder = self
            .client
            .request(spec.method.clone(), self.url(&spec.path))
            .headers(spec.headers.clone())
            .header(header::ACCEPT, "application/json");
        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        if let Some(ref body) = spec.body {
            builder = builder.json(body);
        }

        let (builder, dispatched) = if spec.auth.attaches_token() {
            self.authorize(builder)
        } else {
            let generation = self.session.generation();
            (builder, Dispatched { token: None, generation })
        };

        let response = builder.send().await.map_err(|e| {
            debug!(request = %spec, error = %e, "Request failed to send");
            ApiError::NetworkError(e)
        })?;
        Ok((response, dispatched))
    }

    /// Send `spec`, recovering from an expired access token at most once.
    pub async fn send(&self, spec: RequestSpec) -> Result<Response, ApiError> {
        let mut attempt = Attempt::original();

        loop {
            let (response, dispatched) = self.dispatch(&spec).await?;

            if response.status() != StatusCode::UNAUTHORIZED || !spec.auth.recovers() {
                return Self::check_response(response).await;
            }

            let body = response.text().await.unwrap_or_default();
            let failure = ApiError::describe_body(&body);

            if !attempt.is_original() {
                warn!(request = %spec, "Replayed request rejected again after refresh");
                return Err(ApiError::ReplayExhausted {
                    method: spec.method.to_string(),
                    path: spec.path.clone(),
                });
            }

            let label = spec.to_string();
            match self
                .coordinator
                .recover(&label, dispatched.token.as_deref(), dispatched.generation, &failure)
                .await
            {
                Recovery::Replay => {
                    debug!(request = %label, "Replaying with renewed token");
                    attempt = Attempt::replay();
                }
                Recovery::Reject(error) => return Err(error),
            }
        }
    }

    /// Dispatch once and return the response whatever its status.
    /// No recovery; for callers that interpret failures themselves.
    pub async fn send_raw(&self, spec: RequestSpec) -> Result<Response, ApiError> {
        let (response, _) = self.dispatch(&spec).await?;
        Ok(response)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send `spec` and decode the whole body as `T`
    pub async fn send_json<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T, ApiError> {
        let label = spec.to_string();
        let response = self.send(spec).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", label, e))
        })
    }

    /// Send `spec` and return the `data` of the response envelope
    pub async fn send_data<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T, ApiError> {
        let label = spec.to_string();
        let envelope: ApiEnvelope<T> = self.send_json(spec).await?;
        envelope.into_data().ok_or_else(|| {
            ApiError::InvalidResponse(format!("Response from {} had no data", label))
        })
    }

    // ===== Convenience Methods =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(RequestSpec::get(path)).await
    }

    /// DELETE, discarding any response body
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(RequestSpec::delete(path)).await?;
        Ok(())
    }
}
