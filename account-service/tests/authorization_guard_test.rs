//! Request authorization guard: check order, failure semantics and the
//! account resolution fallbacks.

mod common;

use account_service::{
    config::{AllowedOrigins, Environment},
    middleware::RoutePolicy,
    models::Role,
    repositories::ListQuery,
    store::Filter,
};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
};
use common::{provider_user, test_config, TestApp};
use serde_json::json;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const ISSUED_MS: i64 = 1_700_000_000_000;

fn api_key_app() -> TestApp {
    let mut config = test_config();
    config.environment = Environment::Prod;
    config.security.client_api_key_enabled = true;
    config.security.client_api_key_window_ms = 300_000;
    TestApp::with_config(config)
}

fn restricted_origin_app() -> TestApp {
    let mut config = test_config();
    config.security.allowed_origins =
        AllowedOrigins::List(vec!["https://app.example.com".to_string()]);
    TestApp::with_config(config)
}

fn headers_with(name: &'static str, value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(name, HeaderValue::from_str(value).unwrap());
    headers
}

#[tokio::test]
async fn private_route_without_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app.request("GET", "/v1/auth/me", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn unknown_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app
        .request("GET", "/v1/auth/me", Some("forged"), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
    assert_eq!(app.identity.verify_calls(), 1);
}

#[tokio::test]
async fn disallowed_origin_fails_before_token_verification() {
    let app = restricted_origin_app();
    let account = app.seed_account("admin@x.io", |a| a.is_admin = true).await;
    let token = app.token_for(&account);

    let request = Request::builder()
        .uri("/v1/accounts")
        .header("origin", "https://evil.example.com")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.identity.verify_calls(), 0);
}

#[tokio::test]
async fn allowed_origin_reaches_the_handler() {
    let app = restricted_origin_app();
    let account = app.seed_account("admin@x.io", |a| a.is_admin = true).await;
    let token = app.token_for(&account);

    let request = Request::builder()
        .uri("/v1/accounts")
        .header("origin", "https://app.example.com")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn host_header_is_the_origin_fallback() {
    let app = restricted_origin_app();

    let allowed = Request::builder()
        .uri("/healthcheck")
        .header("host", "app.example.com")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(allowed).await.0, StatusCode::OK);

    let rejected = Request::builder()
        .uri("/healthcheck")
        .header("host", "evil.example.com")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(rejected).await.0, StatusCode::UNAUTHORIZED);

    let missing = Request::builder()
        .uri("/healthcheck")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(missing).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stale_client_api_key_is_rejected() {
    let app = api_key_app();
    let headers = headers_with("x-api-key", "rennan-api_1700000000000");

    let stale = app
        .state
        .guard
        .authorize_at(&headers, RoutePolicy::PUBLIC, ISSUED_MS + 600_000)
        .await;
    assert_eq!(stale.unwrap_err().reason, "client api key expired");

    let fresh = app
        .state
        .guard
        .authorize_at(&headers, RoutePolicy::PUBLIC, ISSUED_MS + 60_000)
        .await
        .unwrap();
    assert!(fresh.origin_valid);
    assert!(fresh.api_key_valid);
    assert!(fresh.is_public_route);
    assert!(fresh.identity.is_none());
}

#[tokio::test]
async fn client_api_key_bypass_and_label_checks() {
    let app = api_key_app();
    let far_future = ISSUED_MS * 2;

    let bypass = headers_with("client-api-key", "rennan-api_420");
    assert_ok!(
        app.state
            .guard
            .authorize_at(&bypass, RoutePolicy::PUBLIC, far_future)
            .await
    );

    let wrong_label = headers_with("x-api-key", "other-app_1700000000000");
    assert_err!(
        app.state
            .guard
            .authorize_at(&wrong_label, RoutePolicy::PUBLIC, ISSUED_MS)
            .await
    );

    assert_err!(
        app.state
            .guard
            .authorize_at(&HeaderMap::new(), RoutePolicy::PUBLIC, ISSUED_MS)
            .await
    );
}

#[tokio::test]
async fn app_names_with_underscores_are_accepted() {
    let mut config = test_config();
    config.environment = Environment::Prod;
    config.security.app_name = "my_app".to_string();
    config.security.client_api_key_enabled = true;
    config.security.client_api_key_window_ms = 300_000;
    assert_ok!(config.validate());

    config.security.app_name = String::new();
    assert_err!(config.validate());

    config.security.app_name = "my_app".to_string();
    let app = TestApp::with_config(config);
    let decision = app
        .state
        .guard
        .authorize_at(
            &headers_with("x-api-key", "my_app_1700000000000"),
            RoutePolicy::PUBLIC,
            ISSUED_MS + 1_000,
        )
        .await
        .unwrap();
    assert!(decision.api_key_valid);

    let wrong_label = headers_with("x-api-key", "app_1700000000000");
    assert_err!(
        app.state
            .guard
            .authorize_at(&wrong_label, RoutePolicy::PUBLIC, ISSUED_MS)
            .await
    );
}

#[tokio::test]
async fn client_api_key_is_only_enforced_in_production() {
    let mut config = test_config();
    config.security.client_api_key_enabled = true;
    let app = TestApp::with_config(config);

    let decision = app
        .state
        .guard
        .authorize(&HeaderMap::new(), RoutePolicy::PUBLIC)
        .await
        .unwrap();
    assert!(decision.is_public_route);
}

#[tokio::test]
async fn public_routes_skip_token_verification() {
    let app = TestApp::new();

    let (status, _) = app
        .request("GET", "/healthcheck", Some("not-even-checked"), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.identity.verify_calls(), 0);
}

#[tokio::test]
async fn admin_passes_moderator_routes() {
    let app = TestApp::new();
    let admin = app.seed_account("admin@x.io", |a| a.is_admin = true).await;
    let token = app.token_for(&admin);

    let (status, _) = app
        .request("GET", "/v1/account-events", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let decision = app
        .state
        .guard
        .authorize(
            &headers_with("authorization", &format!("Bearer {}", token)),
            RoutePolicy::roles(&[Role::Moderator]),
        )
        .await
        .unwrap();
    assert!(decision.roles_matched);
    assert_eq!(decision.account.map(|a| a.id), Some(admin.id));
}

#[tokio::test]
async fn moderator_cannot_delete_events() {
    let app = TestApp::new();
    let moderator = app
        .seed_account("mod@x.io", |a| a.is_moderator = true)
        .await;
    let token = app.token_for(&moderator);

    let (list_status, _) = app
        .request("GET", "/v1/account-events", Some(&token), None)
        .await;
    assert_eq!(list_status, StatusCode::OK);

    let uri = format!("/v1/account-events/{}", uuid::Uuid::new_v4());
    let (delete_status, _) = app.request("DELETE", &uri, Some(&token), None).await;
    assert_eq!(delete_status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_mismatch_is_unauthorized_and_audited() {
    let app = TestApp::new();
    let plain = app.seed_account("plain@x.io", |_| {}).await;
    let token = app.token_for(&plain);

    let (status, body) = app
        .request("GET", "/v1/account-events", Some(&token), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));

    let events = app
        .events()
        .find_many(ListQuery::new(
            Filter::new()
                .eq("account_id", plain.id)
                .eq("event_type", "LOGIN_FAILED"),
        ))
        .await
        .unwrap();
    assert_eq!(events.count, 1);
    assert_eq!(
        events.data[0].description.as_deref(),
        Some("not authorized for this route")
    );
}

#[tokio::test]
async fn identity_without_account_fails_role_routes() {
    let app = TestApp::new();
    let token = app.token_for_user(provider_user("uid-ghost", Some("ghost@x.io"), None));

    let (status, _) = app.request("GET", "/v1/accounts", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Routes without roles do not need an account.
    let decision = app
        .state
        .guard
        .authorize(
            &headers_with("authorization", &format!("Bearer {}", token)),
            RoutePolicy::AUTHENTICATED,
        )
        .await
        .unwrap();
    assert_eq!(
        decision.identity.and_then(|i| i.email),
        Some("ghost@x.io".to_string())
    );
    assert!(decision.account.is_none());
}

#[tokio::test]
async fn account_is_found_by_phone_when_email_misses() {
    let app = TestApp::new();
    let admin = app
        .seed_account("stored@x.io", |a| {
            a.phone = Some("+5511999990000".to_string());
            a.is_admin = true;
        })
        .await;
    let token = app.token_for_user(provider_user(
        "uid-phone",
        Some("different@x.io"),
        Some("+5511999990000"),
    ));

    let decision = app
        .state
        .guard
        .authorize(
            &headers_with("authorization", &format!("Bearer {}", token)),
            RoutePolicy::roles(&[Role::Admin]),
        )
        .await
        .unwrap();
    assert_eq!(decision.account.map(|a| a.id), Some(admin.id));
}

#[tokio::test]
async fn account_is_found_by_provider_subject_last() {
    let app = TestApp::new();
    let admin = app
        .seed_account("someone@x.io", |a| {
            a.email = None;
            a.provider_account_id = Some("uid-google".to_string());
            a.is_admin = true;
        })
        .await;
    let token = app.token_for_user(provider_user("uid-google", None, None));

    let (status, _) = app.request("GET", "/v1/accounts", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let decision = app
        .state
        .guard
        .authorize(
            &headers_with("authorization", &format!("Bearer {}", token)),
            RoutePolicy::roles(&[Role::Admin]),
        )
        .await
        .unwrap();
    assert_eq!(decision.account.map(|a| a.id), Some(admin.id));
}

#[tokio::test]
async fn tombstoned_accounts_do_not_authorize() {
    let app = TestApp::new();
    let admin = app.seed_account("admin@x.io", |a| a.is_admin = true).await;
    let token = app.token_for(&admin);
    app.accounts().delete(admin.id).await.unwrap();

    let (status, _) = app.request("GET", "/v1/accounts", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn disabled_provider_user_is_unauthorized() {
    let app = TestApp::new();
    let mut user = provider_user("uid-disabled", Some("off@x.io"), None);
    user.disabled = true;
    let token = app.token_for_user(user);

    let (status, _) = app.request("GET", "/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn slow_identity_provider_times_out_as_unauthorized() {
    let mut config = test_config();
    config.identity.timeout_ms = 50;
    let app = TestApp::with_config(config);
    let account = app.seed_account("slow@x.io", |_| {}).await;
    let token = app.token_for(&account);
    app.identity.set_delay(Duration::from_millis(500));

    let failure = app
        .state
        .guard
        .authorize(
            &headers_with("authorization", &format!("Bearer {}", token)),
            RoutePolicy::AUTHENTICATED,
        )
        .await
        .unwrap_err();

    assert_eq!(failure.reason, "identity provider timed out");
}
