//! Authentication module: credentials, session state and token renewal.
//!
//! This module provides:
//! - `CredentialStore`: In-memory token pair mirrored to a persistent backend
//! - `Session`: The signed-in identity shared by every request
//! - `TokenRefresher`: One call to the renewal endpoint
//! - `FailureCoordinator`: Collapses concurrent 401s into a single refresh
//! - `SessionManager`: Login, register, startup restoration and logout
//!
//! Access tokens are short-lived. A 401 on an authenticated request triggers
//! at most one refresh, after which the request is replayed once.

pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod refresher;
pub mod session;
pub mod store;

pub use coordinator::{FailureCoordinator, Recovery, RefreshOutcome};
pub use credentials::KeyringTokenStore;
pub use error::{AuthError, RefreshError};
pub use lifecycle::SessionManager;
pub use refresher::TokenRefresher;
pub use session::{Session, SessionSnapshot, TerminationHook, TerminationReason};
pub use store::{CredentialStore, FileTokenStore, MemoryTokenStore, StoredTokens, TokenStore};
