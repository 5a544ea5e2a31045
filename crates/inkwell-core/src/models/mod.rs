//! Wire models for the notes server's authentication endpoints.
//!
//! - `UserProfile`: the signed-in account as returned by `/auth/profile/`
//! - `LoginParams`, `RegisterParams`, `ProfileUpdate`: request bodies
//! - `ApiEnvelope`: the `{code, message, data, errors}` wrapper every response uses

pub mod envelope;
pub mod user;

pub use envelope::{ApiEnvelope, AuthPayload, RefreshPayload};
pub use user::{LoginParams, ProfileUpdate, RegisterParams, UserProfile};
