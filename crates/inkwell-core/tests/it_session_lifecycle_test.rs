//! Integration tests for session startup, sign-in and sign-out

mod common;

use common::*;
use inkwell_core::auth::store::ACCESS_TOKEN_KEY;
use inkwell_core::{
    ApiError, AuthError, CredentialStore, FileTokenStore, LoginParams, ProfileUpdate,
    RegisterParams, TerminationReason, TokenStore,
};
use mockito::Matcher;

#[tokio::test]
async fn initialize_with_valid_token_restores_without_refresh() {
    //* Given
    let mut server = new_server().await;
    let profile = profile_ok(&mut server, "a1", 1).await;
    let refresh = refresh_failing(&mut server, 401, 0).await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);

    //* When
    manager.initialize().await;

    //* Then
    profile.assert_async().await;
    refresh.assert_async().await;
    let snapshot = manager.snapshot();
    assert!(snapshot.initialized);
    assert!(snapshot.authenticated);
    assert_eq!(snapshot.user.map(|u| u.username), Some("ada".to_string()));
    assert!(terminations.seen().is_empty());
}

#[tokio::test]
async fn initialize_with_expired_token_refreshes_once_and_restores() {
    //* Given
    let mut server = new_server().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    // Previous run left an expired access token behind
    CredentialStore::new(FileTokenStore::new(dir.path()))
        .save("a1", "r1")
        .expect("Failed to seed tokens");
    let terminations = Terminations::default();

    let expired = profile_expired(&mut server, "a1", 1).await;
    let refresh = refresh_ok(&mut server, "r1", "a2", 1).await;
    let profile = profile_ok(&mut server, "a2", 1).await;
    let manager = manager_with_file_store(&server, dir.path(), &terminations);

    //* When
    manager.initialize().await;

    //* Then
    expired.assert_async().await;
    refresh.assert_async().await;
    profile.assert_async().await;

    let snapshot = manager.snapshot();
    assert!(snapshot.initialized);
    assert!(snapshot.authenticated);
    assert!(snapshot.user.is_some());
    assert_eq!(manager.session().access_token().as_deref(), Some("a2"));
    assert_eq!(
        persisted_tokens(dir.path()),
        (Some("a2".to_string()), Some("r1".to_string()))
    );
    assert!(terminations.seen().is_empty());
}

#[tokio::test]
async fn initialize_with_invalid_refresh_token_ends_session() {
    //* Given
    let mut server = new_server().await;
    let expired = profile_expired(&mut server, "a1", 1).await;
    let refresh = refresh_failing(&mut server, 401, 1).await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);

    //* When
    manager.initialize().await;

    //* Then
    expired.assert_async().await;
    refresh.assert_async().await;

    let snapshot = manager.snapshot();
    assert!(snapshot.initialized);
    assert!(!snapshot.authenticated);
    assert!(snapshot.user.is_none());
    assert!(manager.session().refresh_token().is_none());
    assert_eq!(terminations.seen(), vec![TerminationReason::Expired]);
}

#[tokio::test]
async fn initialize_without_stored_tokens_makes_no_requests() {
    //* Given
    let mut server = new_server().await;
    let any = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, None, None, &terminations);

    //* When
    manager.initialize().await;

    //* Then
    any.assert_async().await;
    let snapshot = manager.snapshot();
    assert!(snapshot.initialized);
    assert!(!snapshot.authenticated);
    assert!(terminations.seen().is_empty());
}

#[tokio::test]
async fn initialize_discards_incomplete_token_pair() {
    //* Given
    let server = new_server().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    // Interrupted write: access token only
    FileTokenStore::new(dir.path())
        .set(ACCESS_TOKEN_KEY, "a1")
        .expect("Failed to seed access token");
    let terminations = Terminations::default();
    let manager = manager_with_file_store(&server, dir.path(), &terminations);

    //* When
    manager.initialize().await;

    //* Then
    assert!(manager.snapshot().initialized);
    assert!(!manager.snapshot().authenticated);
    assert_eq!(persisted_tokens(dir.path()), (None, None));
    assert!(terminations.seen().is_empty());
}

#[tokio::test]
async fn initialize_runs_once_for_concurrent_and_repeated_calls() {
    //* Given
    let mut server = new_server().await;
    let profile = profile_ok(&mut server, "a1", 1).await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);

    //* When
    tokio::join!(manager.initialize(), manager.initialize());
    manager.initialize().await;

    //* Then
    profile.assert_async().await;
    assert!(manager.snapshot().initialized);
}

#[tokio::test]
async fn login_success_persists_tokens_and_user() {
    //* Given
    let mut server = new_server().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let login = server
        .mock("POST", "/api/auth/login/")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(serde_json::json!({
            "email": "ada@example.com", "password": "correct horse"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope(serde_json::json!({
            "user": user_json(), "access": "a1", "refresh": "r1"
        })))
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_file_store(&server, dir.path(), &terminations);
    manager.initialize().await;

    //* When
    let snapshot = manager
        .login(&LoginParams::new("ada@example.com", "correct horse"))
        .await
        .expect("Login should succeed");

    //* Then
    login.assert_async().await;
    assert!(snapshot.authenticated);
    assert!(snapshot.initialized);
    assert_eq!(snapshot.user.map(|u| u.id), Some(7));
    assert_eq!(
        persisted_tokens(dir.path()),
        (Some("a1".to_string()), Some("r1".to_string()))
    );
}

#[tokio::test]
async fn login_failure_leaves_existing_session_untouched() {
    //* Given
    let mut server = new_server().await;
    let _profile = profile_ok(&mut server, "a1", 1).await;
    let login = server
        .mock("POST", "/api/auth/login/")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"code": 400, "message": "Invalid credentials", "data": null,
                "errors": {"password": ["Incorrect password."]}}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);
    manager.initialize().await;
    let before = manager.snapshot();

    //* When
    let result = manager
        .login(&LoginParams::new("ada@example.com", "wrong"))
        .await;

    //* Then
    login.assert_async().await;
    let error = result.expect_err("Login should fail");
    assert!(matches!(
        error,
        AuthError::Rejected { status: 400, ref message, .. } if message == "Invalid credentials"
    ));
    assert_eq!(error.field_messages(), vec!["password: Incorrect password."]);
    assert_eq!(manager.snapshot(), before);
    assert_eq!(manager.session().access_token().as_deref(), Some("a1"));
    assert_eq!(manager.session().refresh_token().as_deref(), Some("r1"));
}

#[tokio::test]
async fn login_rejects_blank_fields_without_network() {
    //* Given
    let mut server = new_server().await;
    let login = server
        .mock("POST", "/api/auth/login/")
        .expect(0)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, None, None, &terminations);

    //* When
    let no_email = manager.login(&LoginParams::new("  ", "pw")).await;
    let no_password = manager.login(&LoginParams::new("ada@example.com", "")).await;

    //* Then
    login.assert_async().await;
    assert!(matches!(no_email, Err(AuthError::MissingField { field: "email" })));
    assert!(matches!(no_password, Err(AuthError::MissingField { field: "password" })));
}

#[tokio::test]
async fn register_password_mismatch_makes_no_request() {
    //* Given
    let mut server = new_server().await;
    let register = server
        .mock("POST", "/api/auth/register/")
        .expect(0)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, None, None, &terminations);

    //* When
    let result = manager
        .register(&RegisterParams {
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
            password: "one".to_string(),
            password_confirm: "two".to_string(),
        })
        .await;

    //* Then
    register.assert_async().await;
    assert!(matches!(result, Err(AuthError::PasswordMismatch)));
    assert!(!manager.snapshot().authenticated);
}

#[tokio::test]
async fn register_success_establishes_session() {
    //* Given
    let mut server = new_server().await;
    let register = server
        .mock("POST", "/api/auth/register/")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "email": "ada@example.com", "username": "ada"
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(envelope(serde_json::json!({
            "user": user_json(), "access": "a1", "refresh": "r1"
        })))
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, None, None, &terminations);

    //* When
    let snapshot = manager
        .register(&RegisterParams {
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
            password: "s3cret!".to_string(),
            password_confirm: "s3cret!".to_string(),
        })
        .await
        .expect("Register should succeed");

    //* Then
    register.assert_async().await;
    assert!(snapshot.authenticated);
    assert!(snapshot.initialized);
    assert_eq!(manager.session().refresh_token().as_deref(), Some("r1"));
}

#[tokio::test]
async fn logout_is_idempotent_and_notifies_each_time() {
    //* Given
    let mut server = new_server().await;
    let _profile = profile_ok(&mut server, "a1", 1).await;
    let logout = server
        .mock("POST", "/api/auth/logout/")
        .match_header("authorization", bearer("a1").as_str())
        .match_body(Matcher::Json(serde_json::json!({"refresh": "r1"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope(serde_json::Value::Null))
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);
    manager.initialize().await;

    //* When
    manager.logout().await;
    let first = manager.snapshot();
    manager.logout().await;
    let second = manager.snapshot();

    //* Then
    logout.assert_async().await;
    assert_eq!(first, second);
    assert!(!second.authenticated);
    assert!(second.user.is_none());
    assert!(second.initialized);
    assert_eq!(
        terminations.seen(),
        vec![TerminationReason::Logout, TerminationReason::Logout]
    );
}

#[tokio::test]
async fn logout_clears_local_state_when_server_fails() {
    //* Given
    let mut server = new_server().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let _login = server
        .mock("POST", "/api/auth/login/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope(serde_json::json!({
            "user": user_json(), "access": "a1", "refresh": "r1"
        })))
        .create_async()
        .await;
    let logout = server
        .mock("POST", "/api/auth/logout/")
        .with_status(500)
        .with_body("Internal Server Error")
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_file_store(&server, dir.path(), &terminations);
    manager
        .login(&LoginParams::new("ada@example.com", "pw"))
        .await
        .expect("Login should succeed");

    //* When
    manager.logout().await;

    //* Then
    logout.assert_async().await;
    assert!(!manager.snapshot().authenticated);
    assert_eq!(persisted_tokens(dir.path()), (None, None));
    assert_eq!(terminations.seen(), vec![TerminationReason::Logout]);
}

#[tokio::test]
async fn delete_account_ends_session() {
    //* Given
    let mut server = new_server().await;
    let _profile = profile_ok(&mut server, "a1", 1).await;
    let delete = server
        .mock("DELETE", "/api/auth/account/")
        .match_header("authorization", bearer("a1").as_str())
        .match_body(Matcher::Json(serde_json::json!({"password": "pw", "refresh": "r1"})))
        .with_status(204)
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);
    manager.initialize().await;

    //* When
    manager
        .delete_account("pw")
        .await
        .expect("Delete should succeed");

    //* Then
    delete.assert_async().await;
    assert!(!manager.snapshot().authenticated);
    assert_eq!(terminations.seen(), vec![TerminationReason::AccountDeleted]);
}

#[tokio::test]
async fn update_profile_replaces_cached_user() {
    //* Given
    let mut server = new_server().await;
    let _profile = profile_ok(&mut server, "a1", 1).await;
    let mut updated = user_json();
    updated["bio"] = serde_json::json!("Keeps lists");
    let update = server
        .mock("PUT", "/api/auth/profile/")
        .match_header("authorization", bearer("a1").as_str())
        .match_body(Matcher::Json(serde_json::json!({"bio": "Keeps lists"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope(updated))
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);
    manager.initialize().await;

    //* When
    let empty = manager.update_profile(&ProfileUpdate::default()).await;
    let user = manager
        .update_profile(&ProfileUpdate {
            username: None,
            bio: Some("Keeps lists".to_string()),
        })
        .await
        .expect("Update should succeed");

    //* Then
    update.assert_async().await;
    assert!(matches!(empty, Err(ApiError::InvalidRequest(_))));
    assert_eq!(user.bio.as_deref(), Some("Keeps lists"));
    assert_eq!(
        manager.snapshot().user.and_then(|u| u.bio),
        Some("Keeps lists".to_string())
    );
}

#[tokio::test]
async fn change_password_surfaces_validation_errors() {
    //* Given
    let mut server = new_server().await;
    let _profile = profile_ok(&mut server, "a1", 1).await;
    let change = server
        .mock("POST", "/api/auth/password/")
        .match_body(Matcher::Json(serde_json::json!({
            "old_password": "wrong", "new_password": "n3w-secret"
        })))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code": 400, "message": "Old password is incorrect", "data": null}"#)
        .expect(1)
        .create_async()
        .await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);
    manager.initialize().await;

    //* When
    let result = manager.change_password("wrong", "n3w-secret").await;

    //* Then
    change.assert_async().await;
    assert!(matches!(result, Err(ApiError::BadRequest(ref m)) if m == "Old password is incorrect"));
    assert!(manager.snapshot().authenticated);
    assert!(terminations.seen().is_empty());
}

#[tokio::test]
async fn export_data_recovers_from_expired_token() {
    //* Given
    let mut server = new_server().await;
    let _profile = profile_ok(&mut server, "a1", 1).await;
    let stale = server
        .mock("GET", "/api/auth/export/")
        .match_header("authorization", bearer("a1").as_str())
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code": 401, "message": "Token is expired", "data": null}"#)
        .expect(1)
        .create_async()
        .await;
    let export = server
        .mock("GET", "/api/auth/export/")
        .match_header("authorization", bearer("a2").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(envelope(serde_json::json!({
            "user": user_json(),
            "notes": [{"id": 1, "title": "Groceries"}]
        })))
        .expect(1)
        .create_async()
        .await;
    let refresh = refresh_ok(&mut server, "r1", "a2", 1).await;
    let terminations = Terminations::default();
    let manager = manager_with_tokens(&server, Some("a1"), Some("r1"), &terminations);
    manager.initialize().await;

    //* When
    let data = manager.export_data().await.expect("Export should succeed");

    //* Then
    stale.assert_async().await;
    refresh.assert_async().await;
    export.assert_async().await;
    assert_eq!(data["user"]["username"], "ada");
    assert_eq!(data["notes"][0]["title"], "Groceries");
    assert!(terminations.seen().is_empty());
}
