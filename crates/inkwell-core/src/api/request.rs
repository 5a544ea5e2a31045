//! Description of an outbound call, independent of the credential attached to it.
//!
//! A `RequestSpec` never carries an `Authorization` header; the interceptor
//! adds the current bearer token every time the spec is dispatched, so a
//! replay after a refresh automatically picks up the new token.

use std::fmt;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Serialize;

use super::ApiError;

/// How a request relates to the session's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPolicy {
    /// Attach the bearer token; a 401 enters the failure coordinator
    #[default]
    Recover,
    /// Attach the bearer token; a 401 is surfaced as-is
    AttachOnly,
    /// No bearer token and no recovery (login, register)
    Anonymous,
}

impl AuthPolicy {
    pub fn attaches_token(self) -> bool {
        !matches!(self, AuthPolicy::Anonymous)
    }

    pub fn recovers(self) -> bool {
        matches!(self, AuthPolicy::Recover)
    }
}

/// Retry eligibility carried alongside a request.
///
/// Only an original attempt may trigger (or wait on) a refresh; a replay
/// that fails authentication again is surfaced immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub original: bool,
}

impl Attempt {
    pub fn original() -> Self {
        Self { original: true }
    }

    pub fn replay() -> Self {
        Self { original: false }
    }

    pub fn is_original(self) -> bool {
        self.original
    }
}

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: HeaderMap,
    pub auth: AuthPolicy,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self {
            method,
            path,
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            auth: AuthPolicy::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `body` as the JSON payload
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header. `Authorization` is owned by the interceptor and ignored here.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name != AUTHORIZATION {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn auth(mut self, policy: AuthPolicy) -> Self {
        self.auth = policy;
        self
    }

    pub fn anonymous(self) -> Self {
        self.auth(AuthPolicy::Anonymous)
    }
}

/// `METHOD /path`, used in logs
impl fmt::Display for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
