//! Authentication flows: password registration/login and sign-in links
//! through the identity provider, and provider-side (bearer token)
//! registration/login.

use service_core::error::AppError;
use std::sync::Arc;

use super::auditor::{AccountEventAuditor, AuditSubject};
use super::directory::AccountDirectory;
use super::identity::{IdentityError, IdentityProvider};
use crate::dtos::auth::{AuthResponse, LoginRequest, RegisterRequest};
use crate::models::{Account, EventType, Identity, ProviderSession};
use crate::repositories::AccountRepository;

#[derive(Clone)]
pub struct AuthService {
    accounts: AccountRepository,
    directory: AccountDirectory,
    auditor: AccountEventAuditor,
    identity: Arc<dyn IdentityProvider>,
    app_name: String,
}

impl AuthService {
    pub fn new(
        accounts: AccountRepository,
        directory: AccountDirectory,
        auditor: AccountEventAuditor,
        identity: Arc<dyn IdentityProvider>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            directory,
            auditor,
            identity,
            app_name: app_name.into(),
        }
    }

    /// Whether the email belongs to an account, tombstoned ones included.
    pub async fn verify_email_exists(&self, email: &str) -> Result<bool, AppError> {
        Ok(self.accounts.email_exists(email).await?)
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AppError> {
        if self.accounts.email_exists(&req.email).await? {
            return Err(conflict("email"));
        }
        if let Some(phone) = req.phone.as_deref() {
            if self.accounts.phone_exists(phone).await? {
                return Err(conflict("phone"));
            }
        }

        let session = self
            .identity
            .sign_up(&req.email, &req.password, Some(&req.name))
            .await
            .map_err(|e| match e {
                IdentityError::Rejected(msg) if msg.starts_with("EMAIL_EXISTS") => conflict("email"),
                IdentityError::Rejected(msg) => {
                    AppError::BadRequest(anyhow::anyhow!("Registration rejected: {}", msg))
                }
                other => other.into(),
            })?;
        let token = self.identity.verify_token(&session.id_token).await?;

        let mut account = Account::new(req.name.trim());
        account.email = Some(req.email.clone());
        account.phone = req.phone.clone();
        account.lead_origin = Some(self.app_name.clone());
        account.provider = token.sign_in_provider.clone();
        account.provider_aud = Some(token.audience.clone());
        account.provider_account_id = Some(token.uid.clone());
        account.provider_identity_id = token.provider_identity_id.clone();
        account.is_email_verified = token.email_verified;

        let account = self.accounts.create(&account).await?;
        tracing::info!(account_id = %account.id, "Account registered");

        self.auditor
            .record(
                AuditSubject::Account(account.id),
                EventType::Register,
                "Register with email/password",
            )
            .await;

        Ok(auth_response(account, session))
    }

    /// Password login. Every failure is audited as LOGIN_FAILED against the
    /// account owning the email, when there is one.
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AppError> {
        match self.try_login(&req).await {
            Ok(response) => {
                self.auditor
                    .record(
                        AuditSubject::Account(response.account.id),
                        EventType::Login,
                        "Login with email/password",
                    )
                    .await;
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Password login failed");
                self.auditor
                    .record(
                        AuditSubject::Email(&req.email),
                        EventType::LoginFailed,
                        &format!("Login failed (Email/Password): {}", e),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn try_login(&self, req: &LoginRequest) -> Result<AuthResponse, AppError> {
        let session = self.identity.sign_in(&req.email, &req.password).await?;
        self.identity.verify_token(&session.id_token).await?;
        let user = self.identity.get_user(&session.id_token).await?;
        if user.disabled {
            return Err(unauthorized("provider user is disabled"));
        }

        let account = self
            .accounts
            .find_by_email(&req.email)
            .await?
            .ok_or_else(|| unauthorized("user not found"))?;
        if !account.is_active {
            return Err(unauthorized("account is inactive"));
        }

        Ok(auth_response(account, session))
    }

    /// Issues a passwordless sign-in link that lands on `{base_url}/login`.
    /// Both outcomes are audited against the account owning the email.
    pub async fn login_with_link(&self, email: &str, base_url: &str) -> Result<String, AppError> {
        let continue_url = continue_url(base_url, email)?;

        match self.identity.sign_in_link(email, continue_url.as_str()).await {
            Ok(link) => {
                self.auditor
                    .record(AuditSubject::Email(email), EventType::Login, "Login with link")
                    .await;
                Ok(link)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sign-in link request failed");
                self.auditor
                    .record(
                        AuditSubject::Email(email),
                        EventType::LoginFailed,
                        &format!("Login failed (Link): {}", e),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    /// Creates the account for an identity already verified by the guard.
    pub async fn register_with_identity(
        &self,
        identity: &Identity,
        is_provider_anonymous: bool,
    ) -> Result<Account, AppError> {
        if self.directory.find_account_for_identity(identity).await?.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!("Account already exists")));
        }
        if let Some(email) = identity.email.as_deref() {
            if self.accounts.email_exists(email).await? {
                return Err(conflict("email"));
            }
        }

        let name = identity
            .display_name
            .clone()
            .or_else(|| {
                identity
                    .email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let mut account = Account::new(name);
        account.email = identity.email.clone();
        account.phone = identity.phone.clone();
        account.photo_url = identity.photo_url.clone();
        account.lead_origin = Some(self.app_name.clone());
        account.provider = identity.provider_name.clone();
        account.provider_aud = identity.provider_audience.clone();
        account.provider_account_id = Some(identity.provider_subject_id.clone());
        account.provider_identity_id = identity.provider_identity_id.clone();
        account.is_email_verified = identity.email_verified;
        account.is_provider_anonymous = is_provider_anonymous;

        let account = self.accounts.create(&account).await?;
        tracing::info!(account_id = %account.id, provider = ?identity.provider_name, "Account registered");

        self.auditor
            .record(
                AuditSubject::Account(account.id),
                EventType::Register,
                &format!("Register with {}", provider_label(identity)),
            )
            .await;

        Ok(account)
    }

    pub async fn login_with_identity(&self, identity: &Identity) -> Result<Account, AppError> {
        let account = self
            .directory
            .find_account_for_identity(identity)
            .await?
            .ok_or_else(|| unauthorized("user not found"))?;

        self.auditor
            .record(
                AuditSubject::Account(account.id),
                EventType::Login,
                &format!("Login with {}", provider_label(identity)),
            )
            .await;

        Ok(account)
    }

    pub async fn me(&self, identity: &Identity) -> Result<Account, AppError> {
        self.directory
            .find_account_for_identity(identity)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))
    }

    pub async fn logout(&self, identity: &Identity) -> Result<(), AppError> {
        let account = self.me(identity).await?;
        self.auditor
            .record(AuditSubject::Account(account.id), EventType::Logout, "Logout")
            .await;
        Ok(())
    }
}

fn auth_response(account: Account, session: ProviderSession) -> AuthResponse {
    AuthResponse {
        account,
        token: session.id_token,
        refresh_token: session.refresh_token,
        expires_in: session.expires_in,
    }
}

fn continue_url(base_url: &str, email: &str) -> Result<reqwest::Url, AppError> {
    let mut url = reqwest::Url::parse(base_url.trim())
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid base_url: {}", e)))?;
    if url.cannot_be_a_base() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid base_url: {}",
            base_url
        )));
    }
    let path = format!("{}/login", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.query_pairs_mut().append_pair("email", email);
    Ok(url)
}

fn provider_label(identity: &Identity) -> &str {
    identity.provider_name.as_deref().unwrap_or("identity provider")
}

fn conflict(field: &str) -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "The value for field(s) {} is already in use",
        field
    ))
}

fn unauthorized(reason: &str) -> AppError {
    AppError::Unauthorized(anyhow::anyhow!(reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continue_url_points_at_the_login_page() {
        let url = continue_url("https://app.example.com/", "a+b@x.io").unwrap();
        assert_eq!(url.as_str(), "https://app.example.com/login?email=a%2Bb%40x.io");

        let nested = continue_url("https://app.example.com/portal?ref=1", "a@x.io").unwrap();
        assert_eq!(nested.as_str(), "https://app.example.com/portal/login?email=a%40x.io");
    }

    #[test]
    fn continue_url_rejects_non_urls() {
        assert!(continue_url("not a url", "a@x.io").is_err());
        assert!(continue_url("mailto:ops@x.io", "a@x.io").is_err());
    }
}
