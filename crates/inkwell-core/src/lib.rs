//! inkwell core library.
//!
//! Keeps a client signed in to the inkwell notes server: credentials are
//! persisted between runs, expired access tokens are renewed transparently,
//! and a rejected refresh token ends the session cleanly.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use inkwell_core::{Config, LoginParams, SessionManager};
//!
//! let config = Config::load()?;
//! let manager = SessionManager::from_config(&config, config.credential_store()?, None)?;
//! manager.initialize().await;
//! if !manager.snapshot().authenticated {
//!     manager.login(&LoginParams::new("ada@example.com", "hunter2")).await?;
//! }
//! let notes: serde_json::Value = manager.client().get("/notes/").await?;
//! # let _ = notes;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, AuthPolicy, RequestSpec};
pub use auth::{
    AuthError, CredentialStore, FileTokenStore, KeyringTokenStore, MemoryTokenStore, RefreshError,
    Session, SessionManager, SessionSnapshot, TerminationHook, TerminationReason, TokenStore,
};
pub use config::{Config, TokenStoreKind};
pub use models::{LoginParams, ProfileUpdate, RegisterParams, UserProfile};
