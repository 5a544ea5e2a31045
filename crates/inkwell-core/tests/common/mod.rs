//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inkwell_core::{
    CredentialStore, FileTokenStore, MemoryTokenStore, SessionManager, TerminationHook,
    TerminationReason,
};
use mockito::{Matcher, Mock, Server, ServerGuard};

/// Every termination the hook has seen, in order
#[derive(Clone, Default)]
pub struct Terminations(Arc<Mutex<Vec<TerminationReason>>>);

impl Terminations {
    pub fn hook(&self) -> TerminationHook {
        let seen = Arc::clone(&self.0);
        Arc::new(move |reason: TerminationReason| seen.lock().expect("hook lock").push(reason))
    }

    pub fn seen(&self) -> Vec<TerminationReason> {
        self.0.lock().expect("hook lock").clone()
    }
}

pub fn base_url(server: &ServerGuard) -> String {
    format!("{}/api", server.url())
}

/// Manager over an in-memory backend pre-populated with `access`/`refresh`
pub fn manager_with_tokens(
    server: &ServerGuard,
    access: Option<&str>,
    refresh: Option<&str>,
    terminations: &Terminations,
) -> SessionManager {
    let store = CredentialStore::new(MemoryTokenStore::with_tokens(access, refresh));
    SessionManager::new(
        &base_url(server),
        Duration::from_secs(5),
        store,
        Some(terminations.hook()),
    )
    .expect("Failed to build session manager")
}

/// Manager persisting tokens under `dir`
pub fn manager_with_file_store(
    server: &ServerGuard,
    dir: &Path,
    terminations: &Terminations,
) -> SessionManager {
    let store = CredentialStore::new(FileTokenStore::new(dir));
    SessionManager::new(
        &base_url(server),
        Duration::from_secs(5),
        store,
        Some(terminations.hook()),
    )
    .expect("Failed to build session manager")
}

/// What a fresh process would find on disk under `dir`
pub fn persisted_tokens(dir: &Path) -> (Option<String>, Option<String>) {
    let store = CredentialStore::new(FileTokenStore::new(dir));
    let tokens = store.load().expect("Failed to read token file");
    (tokens.access, tokens.refresh)
}

pub fn user_json() -> serde_json::Value {
    serde_json::json!({
        "id": 7,
        "email": "ada@example.com",
        "username": "ada",
        "avatar": null,
        "bio": null,
        "created_at": "2024-03-01T08:30:00Z",
        "updated_at": "2024-03-01T08:30:00Z"
    })
}

pub fn envelope(data: serde_json::Value) -> String {
    serde_json::json!({"code": 200, "message": "ok", "data": data}).to_string()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Profile endpoint answering 200 for `token`
pub async fn profile_ok(server: &mut ServerGuard, token: &str, hits: usize) -> Mock {
    server
        .mock("GET", "/api/auth/profile/")
        .match_header("authorization", bearer(token).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope(user_json()))
        .expect(hits)
        .create_async()
        .await
}

/// Profile endpoint rejecting `token` as expired
pub async fn profile_expired(server: &mut ServerGuard, token: &str, hits: usize) -> Mock {
    server
        .mock("GET", "/api/auth/profile/")
        .match_header("authorization", bearer(token).as_str())
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code": 401, "message": "Token is expired", "data": null}"#)
        .expect(hits)
        .create_async()
        .await
}

/// Refresh endpoint exchanging `refresh` for `access`
pub async fn refresh_ok(server: &mut ServerGuard, refresh: &str, access: &str, hits: usize) -> Mock {
    server
        .mock("POST", "/api/auth/refresh/")
        .match_body(Matcher::Json(serde_json::json!({"refresh": refresh})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope(serde_json::json!({"access": access})))
        .expect(hits)
        .create_async()
        .await
}

/// Refresh endpoint answering `status` with no usable token
pub async fn refresh_failing(server: &mut ServerGuard, status: usize, hits: usize) -> Mock {
    server
        .mock("POST", "/api/auth/refresh/")
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code": 401, "message": "Token is invalid or expired", "data": null}"#)
        .expect(hits)
        .create_async()
        .await
}

pub async fn new_server() -> ServerGuard {
    Server::new_async().await
}
