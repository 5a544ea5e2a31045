//! REST API client for the inkwell notes server.
//!
//! Requests are described with `RequestSpec` and sent through `ApiClient`,
//! which attaches the session's bearer token and recovers from expired
//! access tokens. Responses use the server's `{code, message, data, errors}`
//! envelope.

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::{Attempt, AuthPolicy, RequestSpec};
