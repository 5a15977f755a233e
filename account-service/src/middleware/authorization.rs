//! Request authorization guard.
//!
//! Every routed request is evaluated in a fixed order, each step
//! short-circuiting on failure:
//!
//! 1. origin allow-list (`Origin`, falling back to `Host`)
//! 2. client API key `<app name>_<epoch millis>` (production, when enabled)
//! 3. public routes succeed here without an identity
//! 4. bearer token verified with the identity provider
//! 5. role check against the stored account, when the route declares roles
//!
//! All failures surface as the same `Unauthorized` response. The reason is
//! only logged.

use axum::{
    async_trait,
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use service_core::error::AppError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::routes::{policy_for, RoutePolicy};
use crate::config::{AccountConfig, AllowedOrigins};
use crate::models::{Account, EventType, Identity};
use crate::services::{AccountDirectory, AccountEventAuditor, AuditSubject, IdentityProvider};
use crate::AppState;

pub const CLIENT_API_KEY_HEADERS: [&str; 2] = ["x-api-key", "client-api-key"];

#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub allowed_origins: AllowedOrigins,
    pub app_name: String,
    pub require_client_api_key: bool,
    pub client_api_key_window_ms: i64,
    pub client_api_key_bypass: String,
    pub identity_timeout: Duration,
}

impl GuardSettings {
    pub fn from_config(config: &AccountConfig) -> Self {
        Self {
            allowed_origins: config.security.allowed_origins.clone(),
            app_name: config.security.app_name.clone(),
            require_client_api_key: config.is_production()
                && config.security.client_api_key_enabled,
            client_api_key_window_ms: config.security.client_api_key_window_ms,
            client_api_key_bypass: config.security.client_api_key_bypass.clone(),
            identity_timeout: Duration::from_millis(config.identity.timeout_ms),
        }
    }
}

/// Working state of one request's evaluation.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationDecision {
    pub origin_valid: bool,
    pub api_key_valid: bool,
    pub is_public_route: bool,
    pub identity: Option<Identity>,
    pub account: Option<Account>,
    pub roles_matched: bool,
}

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct AuthorizationFailure {
    pub reason: String,
    /// Set when the failure can be tied to a stored account.
    pub account_id: Option<Uuid>,
}

impl AuthorizationFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            account_id: None,
        }
    }
}

impl From<AuthorizationFailure> for AppError {
    fn from(failure: AuthorizationFailure) -> Self {
        AppError::Unauthorized(anyhow::anyhow!(failure.reason))
    }
}

#[derive(Clone)]
pub struct AuthorizationGuard {
    settings: Arc<GuardSettings>,
    identity: Arc<dyn IdentityProvider>,
    directory: AccountDirectory,
    auditor: AccountEventAuditor,
}

impl AuthorizationGuard {
    pub fn new(
        settings: GuardSettings,
        identity: Arc<dyn IdentityProvider>,
        directory: AccountDirectory,
        auditor: AccountEventAuditor,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            identity,
            directory,
            auditor,
        }
    }

    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        policy: RoutePolicy,
    ) -> Result<AuthorizationDecision, AuthorizationFailure> {
        self.authorize_at(headers, policy, Utc::now().timestamp_millis())
            .await
    }

    /// Like [`authorize`](Self::authorize) with an explicit clock, in epoch
    /// milliseconds, for the API-key freshness check.
    pub async fn authorize_at(
        &self,
        headers: &HeaderMap,
        policy: RoutePolicy,
        now_ms: i64,
    ) -> Result<AuthorizationDecision, AuthorizationFailure> {
        let result = self.evaluate(headers, policy, now_ms).await;

        if let Err(failure) = &result {
            tracing::warn!(
                reason = %failure.reason,
                account_id = ?failure.account_id,
                "Request authorization failed"
            );
            metrics::counter!("authorization_failures_total").increment(1);

            if let Some(account_id) = failure.account_id {
                self.auditor
                    .record(
                        AuditSubject::Account(account_id),
                        EventType::LoginFailed,
                        &failure.reason,
                    )
                    .await;
            }
        }

        result
    }

    async fn evaluate(
        &self,
        headers: &HeaderMap,
        policy: RoutePolicy,
        now_ms: i64,
    ) -> Result<AuthorizationDecision, AuthorizationFailure> {
        let mut decision = AuthorizationDecision::default();

        self.check_origin(headers)?;
        decision.origin_valid = true;

        if self.settings.require_client_api_key {
            let key = CLIENT_API_KEY_HEADERS
                .iter()
                .find_map(|name| headers.get(*name))
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| AuthorizationFailure::new("missing client api key"))?;
            validate_client_api_key(
                key,
                &self.settings.app_name,
                &self.settings.client_api_key_bypass,
                self.settings.client_api_key_window_ms,
                now_ms,
            )
            .map_err(AuthorizationFailure::new)?;
        }
        decision.api_key_valid = true;

        if policy.public {
            decision.is_public_route = true;
            return Ok(decision);
        }

        let token = bearer_token(headers).ok_or_else(|| AuthorizationFailure::new("missing token"))?;
        let identity = self.resolve_identity(token).await?;

        if policy.requires_roles() {
            let account = self
                .directory
                .find_account_for_identity(&identity)
                .await
                .map_err(|e| AuthorizationFailure::new(format!("account lookup failed: {}", e)))?
                .ok_or_else(|| AuthorizationFailure::new("user not found"))?;

            if !account.is_authorized_for(policy.roles) {
                return Err(AuthorizationFailure {
                    reason: "not authorized for this route".to_string(),
                    account_id: Some(account.id),
                });
            }

            decision.roles_matched = true;
            decision.account = Some(account);
        }

        decision.identity = Some(identity);
        Ok(decision)
    }

    fn check_origin(&self, headers: &HeaderMap) -> Result<(), AuthorizationFailure> {
        let allowed = &self.settings.allowed_origins;
        if *allowed == AllowedOrigins::Any {
            return Ok(());
        }

        if let Some(origin) = header_str(headers, header::ORIGIN.as_str()) {
            return if allowed.allows(origin.trim_end_matches('/')) {
                Ok(())
            } else {
                Err(AuthorizationFailure::new("invalid origin"))
            };
        }

        let host = header_str(headers, header::HOST.as_str())
            .ok_or_else(|| AuthorizationFailure::new("invalid origin"))?;
        let candidates = [format!("https://{}", host), format!("http://{}", host)];
        if candidates.iter().any(|c| allowed.allows(c)) {
            Ok(())
        } else {
            Err(AuthorizationFailure::new("invalid origin"))
        }
    }

    async fn resolve_identity(&self, token: &str) -> Result<Identity, AuthorizationFailure> {
        let verified = self
            .bounded(self.identity.verify_token(token))
            .await?
            .map_err(|e| AuthorizationFailure::new(e.to_string()))?;

        let user = self
            .bounded(self.identity.get_user(token))
            .await?
            .map_err(|e| AuthorizationFailure::new(e.to_string()))?;

        if user.disabled {
            return Err(AuthorizationFailure::new("provider user is disabled"));
        }

        Ok(Identity::from_provider(&verified, &user))
    }

    async fn bounded<T>(&self, call: impl Future<Output = T>) -> Result<T, AuthorizationFailure> {
        tokio::time::timeout(self.settings.identity_timeout, call)
            .await
            .map_err(|_| AuthorizationFailure::new("identity provider timed out"))
    }
}

/// Checks a `<label>_<epoch millis>` client key. The timestamp may be the
/// bypass value or lie within `window_ms` of `now_ms` in either direction.
pub fn validate_client_api_key(
    key: &str,
    app_name: &str,
    bypass: &str,
    window_ms: i64,
    now_ms: i64,
) -> Result<(), String> {
    let (label, timestamp) = key
        .trim()
        .rsplit_once('_')
        .ok_or_else(|| "malformed client api key".to_string())?;

    if label != app_name {
        return Err("client api key label mismatch".to_string());
    }
    if timestamp == bypass {
        return Ok(());
    }

    let issued_ms: i64 = timestamp
        .parse()
        .map_err(|_| "malformed client api key timestamp".to_string())?;
    if now_ms.saturating_sub(issued_ms).abs() > window_ms {
        return Err("client api key expired".to_string());
    }
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Identity of the caller, present on every non-public route.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

/// Account of the caller, present on routes that declare roles.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub Account);

pub async fn authorization_middleware(
    State(state): State<AppState>,
    matched_path: Option<MatchedPath>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = matched_path
        .as_ref()
        .map(MatchedPath::as_str)
        .unwrap_or_else(|| req.uri().path());
    let policy = policy_for(req.method(), path);

    let decision = state.guard.authorize(req.headers(), policy).await?;

    if let Some(identity) = decision.identity {
        req.extensions_mut().insert(CurrentIdentity(identity));
    }
    if let Some(account) = decision.account {
        req.extensions_mut().insert(CurrentAccount(account));
    }

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("no identity on request")))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentAccount
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentAccount>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("no account on request")))
    }
}
