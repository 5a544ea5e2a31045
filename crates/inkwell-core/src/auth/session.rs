use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::store::{CredentialStore, StoredTokens};
use crate::models::UserProfile;

/// Why the session ended, passed to the termination hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The user asked to sign out
    Logout,
    /// The server rejected the refresh token
    Expired,
    /// The account was deleted
    AccountDeleted,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::Logout => "logged out",
            TerminationReason::Expired => "session expired",
            TerminationReason::AccountDeleted => "account deleted",
        };
        f.write_str(text)
    }
}

/// Called whenever the session is torn down (navigation back to sign-in, etc.)
pub type TerminationHook = Arc<dyn Fn(TerminationReason) + Send + Sync>;

/// Read-only view of the session for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub authenticated: bool,
    pub initialized: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    user: Option<UserProfile>,
    initialized: bool,
    // Bumped whenever the signed-in identity is replaced or ended
    generation: u64,
}

/// Authenticated identity for the running process.
///
/// Constructed once and shared by handle between the API client, the
/// failure coordinator and the lifecycle manager. Every mutation is
/// synchronous; no lock is held across an await.
///
/// Token writes happen under the state lock together with the generation,
/// so a refresh started for one identity can never land on another.
pub struct Session {
    store: CredentialStore,
    state: Mutex<SessionState>,
    on_terminated: Option<TerminationHook>,
}

impl Session {
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            state: Mutex::new(SessionState::default()),
            on_terminated: None,
        }
    }

    pub fn with_termination_hook(mut self, hook: TerminationHook) -> Self {
        self.on_terminated = Some(hook);
        self
    }

    // ===== Reads =====

    /// Bearer token to attach right now. Read on every dispatch, never cached.
    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.refresh_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.access_token().is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state().user.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            user: state.user.clone(),
            authenticated: self.store.access_token().is_some(),
            initialized: state.initialized,
        }
    }

    /// Generation of the current identity; changes on login, register and teardown
    pub(crate) fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Access token and generation read together, for one dispatch
    pub(crate) fn bearer(&self) -> (Option<String>, u64) {
        let state = self.state();
        (self.store.access_token(), state.generation)
    }

    // ===== Writers =====

    /// Pull the persisted pair into the session (startup restoration)
    pub(crate) fn restore(&self) -> Result<StoredTokens> {
        self.store.load()
    }

    /// Full replacement after login or register
    pub(crate) fn establish(&self, access: &str, refresh: &str, user: UserProfile) -> Result<()> {
        let mut state = self.state();
        self.store.save(access, refresh)?;
        state.user = Some(user);
        state.initialized = true;
        state.generation += 1;
        info!("Session established");
        Ok(())
    }

    /// Install a renewed access token for `generation`; the refresh token is
    /// left alone. Returns `false` and writes nothing if that identity has
    /// since been replaced or ended.
    pub(crate) fn apply_refresh(&self, access: &str, generation: u64) -> Result<bool> {
        let state = self.state();
        if state.generation != generation {
            debug!("Discarding renewed token for a session that no longer exists");
            return Ok(false);
        }
        self.store.save_access(access)?;
        debug!("Access token renewed");
        Ok(true)
    }

    pub(crate) fn set_user(&self, user: UserProfile) {
        self.state().user = Some(user);
    }

    pub(crate) fn mark_initialized(&self) {
        self.state().initialized = true;
    }

    /// Drop the persisted pair without ending the session (half-written store)
    pub(crate) fn discard_tokens(&self) {
        let mut state = self.state();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted tokens");
        }
        state.generation += 1;
    }

    /// Clear credentials and the cached profile, then notify the hook.
    ///
    /// Safe to call repeatedly; the hook fires every time. `initialized` is
    /// not reset.
    pub(crate) fn teardown(&self, reason: TerminationReason) {
        self.end(reason, None);
    }

    /// Tear down with `Expired`, but only if `generation` is still current.
    /// A rejected refresh must not end a session that replaced its own.
    pub(crate) fn expire(&self, generation: u64) -> bool {
        self.end(TerminationReason::Expired, Some(generation))
    }

    fn end(&self, reason: TerminationReason, expected: Option<u64>) -> bool {
        {
            let mut state = self.state();
            if expected.is_some_and(|generation| generation != state.generation) {
                debug!(%reason, "Session already replaced, not ending it");
                return false;
            }
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear persisted tokens during teardown");
            }
            state.user = None;
            state.generation += 1;
        }
        info!(%reason, "Session terminated");

        if let Some(ref hook) = self.on_terminated {
            hook(reason);
        }
        true
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
