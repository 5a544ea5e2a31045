use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::session::{Session, SessionSnapshot, TerminationHook, TerminationReason};
use super::store::CredentialStore;
use super::AuthError;
use crate::api::{ApiClient, ApiError, AuthPolicy, RequestSpec};
use crate::config::Config;
use crate::models::envelope::ErrorBody;
use crate::models::{ApiEnvelope, AuthPayload, LoginParams, ProfileUpdate, RegisterParams, UserProfile};

const LOGIN_PATH: &str = "/auth/login/";
const REGISTER_PATH: &str = "/auth/register/";
const LOGOUT_PATH: &str = "/auth/logout/";
const PROFILE_PATH: &str = "/auth/profile/";
const PASSWORD_PATH: &str = "/auth/password/";
const ACCOUNT_PATH: &str = "/auth/account/";
const EXPORT_PATH: &str = "/auth/export/";

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct PasswordChange<'a> {
    old_password: &'a str,
    new_password: &'a str,
}

#[derive(Serialize)]
struct AccountDeletion<'a> {
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh: Option<&'a str>,
}

/// Top-level owner of the session: login, register, startup restoration
/// and logout, plus the account calls that ride on the same client.
pub struct SessionManager {
    session: Arc<Session>,
    client: ApiClient,
    init_lock: AsyncMutex<()>,
}

impl SessionManager {
    /// Wire a session, refresher, coordinator and client together.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        store: CredentialStore,
        on_terminated: Option<TerminationHook>,
    ) -> Result<Self> {
        let mut session = Session::new(store);
        if let Some(hook) = on_terminated {
            session = session.with_termination_hook(hook);
        }
        let session = Arc::new(session);
        let client = ApiClient::new(base_url, timeout, Arc::clone(&session))
            .context("Failed to create HTTP client")?;

        Ok(Self {
            session,
            client,
            init_lock: AsyncMutex::new(()),
        })
    }

    /// Same as `new`, taking the URL and timeout from `config`
    pub fn from_config(
        config: &Config,
        store: CredentialStore,
        on_terminated: Option<TerminationHook>,
    ) -> Result<Self> {
        Self::new(&config.api_base_url(), config.request_timeout(), store, on_terminated)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Client for resource calls; shares this manager's session
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    // =========================================================================
    // Sign in
    // =========================================================================

    pub async fn login(&self, params: &LoginParams) -> Result<SessionSnapshot, AuthError> {
        if params.email.trim().is_empty() {
            return Err(AuthError::MissingField { field: "email" });
        }
        if params.password.is_empty() {
            return Err(AuthError::MissingField { field: "password" });
        }

        debug!(email = %params.email, "Logging in");
        let spec = RequestSpec::post(LOGIN_PATH)
            .anonymous()
            .json(params)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        self.authenticate(spec).await
    }

    pub async fn register(&self, params: &RegisterParams) -> Result<SessionSnapshot, AuthError> {
        if params.email.trim().is_empty() {
            return Err(AuthError::MissingField { field: "email" });
        }
        if params.username.trim().is_empty() {
            return Err(AuthError::MissingField { field: "username" });
        }
        if params.password.is_empty() {
            return Err(AuthError::MissingField { field: "password" });
        }
        if params.password != params.password_confirm {
            return Err(AuthError::PasswordMismatch);
        }

        debug!(email = %params.email, username = %params.username, "Registering");
        let spec = RequestSpec::post(REGISTER_PATH)
            .anonymous()
            .json(params)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        self.authenticate(spec).await
    }

    /// Shared tail of login and register: one anonymous exchange, then a full
    /// replacement of the session. Nothing is touched on failure.
    async fn authenticate(&self, spec: RequestSpec) -> Result<SessionSnapshot, AuthError> {
        let label = spec.to_string();
        let response = self.client.send_raw(spec).await.map_err(|e| match e {
            ApiError::NetworkError(e) => AuthError::NetworkError(e),
            other => AuthError::InvalidResponse(other.to_string()),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed = ErrorBody::parse(&body);
            let message = parsed
                .summary()
                .unwrap_or_else(|| format!("{} failed with status {}", label, status));
            warn!(%status, "Authentication rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
                errors: parsed.errors.unwrap_or_default(),
            });
        }

        let envelope: ApiEnvelope<AuthPayload> = response.json().await.map_err(|e| {
            AuthError::InvalidResponse(format!("Failed to parse {} response: {}", label, e))
        })?;
        let payload = envelope
            .into_data()
            .ok_or_else(|| AuthError::InvalidResponse(format!("{} response had no data", label)))?;

        self.session
            .establish(&payload.access, &payload.refresh, payload.user)
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;

        info!("Signed in");
        Ok(self.session.snapshot())
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Restore a previous session, once. Concurrent callers wait for the
    /// first; later callers return immediately without network traffic.
    pub async fn initialize(&self) {
        let _guard = self.init_lock.lock().await;
        if self.session.is_initialized() {
            return;
        }

        let tokens = match self.session.restore() {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted tokens");
                Default::default()
            }
        };

        if tokens.is_complete() {
            // A 401 here goes through the coordinator: one refresh, one replay
            match self.fetch_profile().await {
                Ok(user) => info!(user = %user.display_name(), "Session restored"),
                Err(ApiError::SessionExpired) => info!("Stored session has expired"),
                Err(e) => warn!(error = %e, "Could not verify stored session"),
            }
        } else if !tokens.is_empty() {
            debug!("Discarding incomplete stored token pair");
            self.session.discard_tokens();
        } else {
            debug!("No stored session");
        }

        self.session.mark_initialized();
    }

    // =========================================================================
    // Sign out
    // =========================================================================

    /// Tell the server (best effort), clear local state, fire the hook.
    pub async fn logout(&self) {
        if let Some(refresh) = self.session.refresh_token() {
            let notify = RequestSpec::post(LOGOUT_PATH)
                .auth(AuthPolicy::AttachOnly)
                .json(&RefreshBody { refresh: &refresh });
            match notify {
                Ok(spec) => {
                    if let Err(e) = self.client.send(spec).await {
                        warn!(error = %e, "Server logout failed, clearing local session anyway");
                    }
                }
                Err(e) => warn!(error = %e, "Could not encode logout request"),
            }
        }

        self.session.teardown(TerminationReason::Logout);
    }

    // =========================================================================
    // Account
    // =========================================================================

    /// Fetch the signed-in user's profile and cache it on the session
    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        let user: UserProfile = self.client.send_data(RequestSpec::get(PROFILE_PATH)).await?;
        self.session.set_user(user.clone());
        Ok(user)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        if update.is_empty() {
            return Err(ApiError::InvalidRequest("Nothing to update".to_string()));
        }
        let user: UserProfile = self
            .client
            .send_data(RequestSpec::put(PROFILE_PATH).json(update)?)
            .await?;
        self.session.set_user(user.clone());
        Ok(user)
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), ApiError> {
        let body = PasswordChange {
            old_password,
            new_password,
        };
        self.client
            .send(RequestSpec::post(PASSWORD_PATH).json(&body)?)
            .await?;
        info!("Password changed");
        Ok(())
    }

    /// Everything the server holds for this account, as one JSON document
    pub async fn export_data(&self) -> Result<serde_json::Value, ApiError> {
        let data: serde_json::Value = self.client.send_data(RequestSpec::get(EXPORT_PATH)).await?;
        debug!("Account data exported");
        Ok(data)
    }

    /// Delete the account and end the session on success
    pub async fn delete_account(&self, password: &str) -> Result<(), ApiError> {
        let refresh = self.session.refresh_token();
        let body = AccountDeletion {
            password,
            refresh: refresh.as_deref(),
        };
        self.client
            .send(RequestSpec::delete(ACCOUNT_PATH).json(&body)?)
            .await?;

        self.session.teardown(TerminationReason::AccountDeleted);
        Ok(())
    }
}
