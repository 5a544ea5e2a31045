//! Exactly-one-refresh-per-episode recovery for requests that fail authentication.
//!
//! The coordinator is either `Idle` or `Refreshing`. The first 401 seen while
//! idle starts a refresh and becomes the head of the pending queue; every 401
//! that arrives before the refresh settles joins the queue instead of starting
//! another one. When the refresh settles, the session is updated first and the
//! queue is then released in FIFO order with the shared outcome. Each waiter
//! replays (or fails) its own request independently.
//!
//! The state check and transition happen under a synchronous lock that is
//! never held across an await. The refresh itself runs on its own task, so it
//! completes even if the request that started it is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::refresher::TokenRefresher;
use super::session::Session;
use super::RefreshError;
use crate::api::ApiError;

/// Shared result of one refresh episode, cloned to every waiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new access token is installed
    Renewed,
    /// The session ended or was replaced while the refresh was in flight
    Superseded,
    Failed(RefreshError),
}

/// What a failed request should do next
#[derive(Debug)]
pub enum Recovery {
    /// Credentials were renewed; dispatch again with the current token
    Replay,
    /// Give up and surface this error to the caller
    Reject(ApiError),
}

/// A request parked until the current refresh settles
struct PendingRequest {
    request: String,
    notify: oneshot::Sender<RefreshOutcome>,
}

enum RefreshState {
    Idle,
    Refreshing {
        /// Session generation the refresh token belongs to
        generation: u64,
        pending: VecDeque<PendingRequest>,
    },
}

pub struct FailureCoordinator {
    session: Arc<Session>,
    refresher: TokenRefresher,
    state: Mutex<RefreshState>,
}

impl FailureCoordinator {
    pub fn new(session: Arc<Session>, refresher: TokenRefresher) -> Self {
        Self {
            session,
            refresher,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// True while a refresh call is outstanding
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state(), RefreshState::Refreshing { .. })
    }

    /// Decide how a request that got a 401 should proceed.
    ///
    /// `used_token` and `dispatched` are the bearer token and session
    /// generation the failed dispatch carried, `failure` the message of that
    /// 401. Only call this for an original attempt; a replay that fails again
    /// must be surfaced without coming back here.
    pub async fn recover(
        self: &Arc<Self>,
        request: &str,
        used_token: Option<&str>,
        dispatched: u64,
        failure: &str,
    ) -> Recovery {
        let outcome = {
            let mut state = self.state();
            match &mut *state {
                RefreshState::Refreshing {
                    generation,
                    pending,
                } => {
                    if dispatched < *generation {
                        debug!(request, "Session replaced since dispatch");
                        return Recovery::Reject(ApiError::SessionExpired);
                    }
                    if dispatched > *generation {
                        // The running refresh belongs to an identity that is gone
                        debug!(request, "Refresh in flight is for a previous session, surfacing 401");
                        return Recovery::Reject(ApiError::Unauthorized(failure.to_string()));
                    }
                    debug!(request, queued = pending.len() + 1, "Waiting on in-flight token refresh");
                    let (notify, outcome) = oneshot::channel();
                    pending.push_back(PendingRequest {
                        request: request.to_string(),
                        notify,
                    });
                    outcome
                }
                RefreshState::Idle => {
                    let (current, generation) = self.session.bearer();
                    if generation != dispatched {
                        debug!(request, "Session ended or replaced since dispatch");
                        return Recovery::Reject(ApiError::SessionExpired);
                    }
                    if current.is_some() && current.as_deref() != used_token {
                        // A refresh already completed after this request was sent
                        debug!(request, "Token superseded since dispatch, replaying");
                        return Recovery::Replay;
                    }

                    let Some(refresh_token) = self.session.refresh_token() else {
                        debug!(request, "No refresh token available, surfacing 401");
                        return Recovery::Reject(ApiError::Unauthorized(failure.to_string()));
                    };

                    info!(request, "Authentication failed, refreshing access token");
                    let (notify, outcome) = oneshot::channel();
                    let mut pending = VecDeque::new();
                    pending.push_back(PendingRequest {
                        request: request.to_string(),
                        notify,
                    });
                    *state = RefreshState::Refreshing {
                        generation,
                        pending,
                    };

                    tokio::spawn(Arc::clone(self).run_refresh(generation, refresh_token));
                    outcome
                }
            }
        };

        match outcome.await {
            Ok(RefreshOutcome::Renewed) => Recovery::Replay,
            Ok(RefreshOutcome::Superseded) => Recovery::Reject(ApiError::SessionExpired),
            Ok(RefreshOutcome::Failed(RefreshError::Invalid(_))) => {
                Recovery::Reject(ApiError::SessionExpired)
            }
            Ok(RefreshOutcome::Failed(RefreshError::Transient(cause))) => {
                debug!(request, %cause, "Refresh unavailable, surfacing original 401");
                Recovery::Reject(ApiError::Unauthorized(failure.to_string()))
            }
            Err(_) => {
                warn!(request, "Token refresh task ended without an outcome");
                Recovery::Reject(ApiError::Unauthorized(failure.to_string()))
            }
        }
    }

    /// One episode: network call, session update, then release the queue.
    async fn run_refresh(self: Arc<Self>, generation: u64, refresh_token: String) {
        let outcome = match self.refresher.refresh(&refresh_token).await {
            Ok(access) => match self.session.apply_refresh(&access, generation) {
                Ok(true) => RefreshOutcome::Renewed,
                Ok(false) => {
                    info!("Session changed during refresh, dropping renewed token");
                    RefreshOutcome::Superseded
                }
                Err(e) => {
                    // The in-memory token is already current; only persistence failed
                    warn!(error = %e, "Failed to persist renewed access token");
                    RefreshOutcome::Renewed
                }
            },
            Err(error) => {
                match error {
                    RefreshError::Invalid(ref reason) => {
                        warn!(%reason, "Refresh token rejected, ending session");
                        self.session.expire(generation);
                    }
                    RefreshError::Transient(ref cause) => {
                        warn!(%cause, "Token refresh failed transiently, keeping session");
                    }
                }
                RefreshOutcome::Failed(error)
            }
        };

        let pending = match std::mem::replace(&mut *self.state(), RefreshState::Idle) {
            RefreshState::Refreshing { pending, .. } => pending,
            RefreshState::Idle => VecDeque::new(),
        };

        debug!(released = pending.len(), outcome = ?outcome, "Token refresh settled");
        for waiter in pending {
            if waiter.notify.send(outcome.clone()).is_err() {
                debug!(request = %waiter.request, "Waiter went away before refresh settled");
            }
        }
    }

    /// Requests currently parked on the refresh
    #[cfg(test)]
    fn queued(&self) -> usize {
        match &*self.state() {
            RefreshState::Refreshing { pending, .. } => pending.len(),
            RefreshState::Idle => 0,
        }
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
