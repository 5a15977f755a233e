//! Shared setup for account-service integration tests: the full router over an
//! in-memory store and a mock identity provider.

#![allow(dead_code)]

use account_service::{
    build_router,
    config::{
        AccountConfig, AllowedOrigins, DatabaseConfig, Environment, IdentityProviderConfig,
        RateLimitConfig, SecurityConfig,
    },
    models::{Account, ProviderUser, StoredModel},
    repositories::{AccountEventRepository, AccountRepository},
    services::MockIdentityProvider,
    store::{memory::MemoryStore, Store},
    AppState,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use tower::ServiceExt;

pub const APP_NAME: &str = "rennan-api";

pub fn test_config() -> AccountConfig {
    AccountConfig {
        common: CoreConfig::default(),
        environment: Environment::Dev,
        service_name: "account-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
            timeout_ms: 1000,
        },
        identity: IdentityProviderConfig {
            api_key: "test-key".to_string(),
            auth_api_url: "http://localhost:9099".to_string(),
            project_id: "test-project".to_string(),
            jwks_url: "http://localhost:9099/jwks".to_string(),
            service_account: None,
            timeout_ms: 1000,
        },
        security: SecurityConfig {
            allowed_origins: AllowedOrigins::Any,
            app_name: APP_NAME.to_string(),
            client_api_key_enabled: false,
            client_api_key_window_ms: 300_000,
            client_api_key_bypass: "420".to_string(),
            blacklisted_ips: Vec::new(),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            register_attempts: 100,
            register_window_seconds: 60,
        },
        admin_seed: None,
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub identity: Arc<MockIdentityProvider>,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AccountConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MockIdentityProvider::new());
        let state = AppState::new(
            config,
            store.clone() as Arc<dyn Store>,
            identity.clone(),
        );
        let router = build_router(state.clone()).expect("router");

        Self {
            store,
            identity,
            state,
            router,
        }
    }

    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.state.store.clone())
    }

    pub fn events(&self) -> AccountEventRepository {
        AccountEventRepository::new(self.state.store.clone())
    }

    /// Stores an account with the given email, adjusted by `configure`.
    pub async fn seed_account(&self, email: &str, configure: impl FnOnce(&mut Account)) -> Account {
        let mut account = Account::new(format!("User {}", email));
        account.email = Some(email.to_string());
        configure(&mut account);
        self.accounts().create(&account).await.expect("seed account")
    }

    /// Registers a provider user mirroring `account` and returns a bearer
    /// token that verifies as them.
    pub fn token_for(&self, account: &Account) -> String {
        let token = format!("token-{}", account.id);
        self.identity.add_user(
            ProviderUser {
                uid: account
                    .provider_account_id
                    .clone()
                    .unwrap_or_else(|| format!("uid-{}", account.id)),
                email: account.email.clone(),
                phone_number: account.phone.clone(),
                display_name: Some(account.name.clone()),
                photo_url: None,
                email_verified: true,
                disabled: false,
            },
            &token,
        );
        token
    }

    /// Registers a provider user with no stored account.
    pub fn token_for_user(&self, user: ProviderUser) -> String {
        let token = format!("token-{}", user.uid);
        self.identity.add_user(user, &token);
        token
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send(build_request(method, uri, token, body)).await
    }
}

pub fn build_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn provider_user(uid: &str, email: Option<&str>, phone: Option<&str>) -> ProviderUser {
    ProviderUser {
        uid: uid.to_string(),
        email: email.map(str::to_string),
        phone_number: phone.map(str::to_string),
        display_name: Some("Provider User".to_string()),
        photo_url: None,
        email_verified: true,
        disabled: false,
    }
}

/// Raw stored rows of a model's table, tombstoned ones included.
pub fn raw_rows<T: StoredModel>(store: &MemoryStore) -> Vec<serde_json::Map<String, Value>> {
    store.raw_rows(T::ENTITY)
}
