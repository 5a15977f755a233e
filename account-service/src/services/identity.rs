//! External identity provider: token verification, user lookup, password
//! sign-in/sign-up and email sign-in links.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{
    decode, decode_header, encode, jwk::JwkSet, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::config::{IdentityProviderConfig, ServiceAccountConfig};
use crate::models::{ProviderSession, ProviderUser, VerifiedToken};

const JWKS_TTL: Duration = Duration::from_secs(3600);
/// Minimum spacing between key refreshes triggered by an unknown `kid`.
const JWKS_MIN_REFRESH: Duration = Duration::from_secs(30);
const IDENTITY_SCOPE: &str = "https://www.googleapis.com/auth/identitytoolkit";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Access tokens are renewed this long before they expire.
const ACCESS_TOKEN_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("rejected by identity provider: {0}")]
    Rejected(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        IdentityError::Unavailable(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for IdentityError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        IdentityError::InvalidToken(err.to_string())
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unavailable(msg) => AppError::BadGateway(msg),
            other => AppError::Unauthorized(anyhow::anyhow!(other)),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, IdentityError>;

    /// Profile of the user owning a previously verified ID token.
    async fn get_user(&self, id_token: &str) -> Result<ProviderUser, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderSession, IdentityError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderSession, IdentityError>;

    /// Generates a passwordless sign-in link for `email` that lands on
    /// `continue_url`.
    async fn sign_in_link(&self, email: &str, continue_url: &str) -> Result<String, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    aud: String,
    auth_time: i64,
    exp: i64,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    firebase: ProviderClaims,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderClaims {
    sign_in_provider: Option<String>,
    #[serde(default)]
    identities: HashMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    email: Option<String>,
    phone_number: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OobResponse {
    oob_link: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

struct CachedAccessToken {
    token: String,
    expires_at: Instant,
}

/// Identity provider speaking the Google Identity Toolkit REST API, verifying
/// RS256 ID tokens against the published JWK set.
pub struct FirebaseIdentityProvider {
    client: reqwest::Client,
    config: IdentityProviderConfig,
    keys: RwLock<Option<CachedKeys>>,
    access_token: AsyncMutex<Option<CachedAccessToken>>,
}

impl FirebaseIdentityProvider {
    pub fn new(config: &IdentityProviderConfig) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            keys: RwLock::new(None),
            access_token: AsyncMutex::new(None),
        })
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.config.project_id)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        {
            let cached = self.keys.read().await;
            if let Some(cached) = cached.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_TTL {
                    if let Some(jwk) = cached.keys.find(kid) {
                        return Ok(DecodingKey::from_jwk(jwk)?);
                    }
                }
            }
        }

        let mut cached = self.keys.write().await;
        if let Some(recent) = cached.as_ref() {
            if recent.fetched_at.elapsed() < JWKS_MIN_REFRESH {
                return find_key(&recent.keys, kid);
            }
        }

        tracing::debug!(kid = %kid, "Refreshing identity provider signing keys");
        let keys: JwkSet = self
            .client
            .get(&self.config.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let key = find_key(&keys, kid);
        *cached = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        key
    }

    /// OAuth access token for the configured service account, reused until
    /// shortly before it expires.
    async fn service_token(&self) -> Result<String, IdentityError> {
        let account = self.config.service_account.as_ref().ok_or_else(|| {
            IdentityError::Unavailable("service account credentials are not configured".to_string())
        })?;

        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let response = self.exchange_assertion(account).await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(ACCESS_TOKEN_SKEW);
        *cached = Some(CachedAccessToken {
            token: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    async fn exchange_assertion(
        &self,
        account: &ServiceAccountConfig,
    ) -> Result<AccessTokenResponse, IdentityError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &account.client_email,
            scope: IDENTITY_SCOPE,
            aud: &account.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes()).map_err(|e| {
            IdentityError::Unavailable(format!("invalid service account key: {}", e))
        })?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| IdentityError::Unavailable(format!("signing assertion: {}", e)))?;

        tracing::debug!(client_email = %account.client_email, "Exchanging service account assertion");
        let response = self
            .client
            .post(&account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdentityError::Unavailable(format!(
                "token exchange failed with {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<T, IdentityError> {
        let url = format!(
            "{}/{}?key={}",
            self.config.auth_api_url.trim_end_matches('/'),
            endpoint,
            self.config.api_key
        );

        let mut request = self.client.post(url).json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response
            .json::<ErrorEnvelope>()
            .await
            .map(|e| e.error.message)
            .unwrap_or_else(|_| status.to_string());

        if status.is_server_error() {
            Err(IdentityError::Unavailable(message))
        } else {
            Err(IdentityError::Rejected(message))
        }
    }

    async fn session(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<ProviderSession, IdentityError> {
        let response: SessionResponse = self.post(endpoint, body, None).await?;
        Ok(ProviderSession {
            uid: response.local_id,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in.parse().unwrap_or(3600),
        })
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, IdentityError> {
        let header = decode_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidToken("token header has no kid".to_string()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.project_id]);
        validation.set_issuer(&[self.issuer()]);

        let claims = decode::<TokenClaims>(token, &key, &validation)?.claims;

        let provider_identity_id = claims
            .firebase
            .sign_in_provider
            .as_ref()
            .and_then(|p| claims.firebase.identities.get(p))
            .and_then(|ids| ids.first())
            .and_then(|id| id.as_str())
            .map(str::to_string);

        Ok(VerifiedToken {
            uid: claims.sub,
            audience: claims.aud,
            auth_time: claims.auth_time,
            expires_at: claims.exp,
            email: claims.email,
            email_verified: claims.email_verified,
            sign_in_provider: claims.firebase.sign_in_provider,
            provider_identity_id,
        })
    }

    async fn get_user(&self, id_token: &str) -> Result<ProviderUser, IdentityError> {
        let response: LookupResponse = self
            .post("accounts:lookup", serde_json::json!({ "idToken": id_token }), None)
            .await?;

        let user = response
            .users
            .into_iter()
            .next()
            .ok_or_else(|| IdentityError::UserNotFound("no user for id token".to_string()))?;

        Ok(ProviderUser {
            uid: user.local_id,
            email: user.email,
            phone_number: user.phone_number,
            display_name: user.display_name,
            photo_url: user.photo_url,
            email_verified: user.email_verified,
            disabled: user.disabled,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderSession, IdentityError> {
        self.session(
            "accounts:signInWithPassword",
            serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }),
        )
        .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderSession, IdentityError> {
        self.session(
            "accounts:signUp",
            serde_json::json!({
                "email": email,
                "password": password,
                "displayName": display_name,
                "returnSecureToken": true,
            }),
        )
        .await
    }

    async fn sign_in_link(&self, email: &str, continue_url: &str) -> Result<String, IdentityError> {
        let token = self.service_token().await?;
        let response: OobResponse = self
            .post(
                "accounts:sendOobCode",
                serde_json::json!({
                    "requestType": "EMAIL_SIGNIN",
                    "email": email,
                    "continueUrl": continue_url,
                    "returnOobLink": true,
                }),
                Some(token.as_str()),
            )
            .await?;
        Ok(response.oob_link)
    }
}

fn find_key(keys: &JwkSet, kid: &str) -> Result<DecodingKey, IdentityError> {
    keys.find(kid)
        .map(DecodingKey::from_jwk)
        .transpose()?
        .ok_or_else(|| IdentityError::InvalidToken(format!("unknown signing key '{}'", kid)))
}

/// In-memory provider for tests and local runs. Tokens are opaque strings
/// registered up front or issued by `sign_in`/`sign_up`.
#[derive(Default)]
pub struct MockIdentityProvider {
    users: Mutex<HashMap<String, ProviderUser>>,
    tokens: Mutex<HashMap<String, VerifiedToken>>,
    passwords: Mutex<HashMap<String, (String, String)>>,
    verify_calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `user` and makes `token` verify as them.
    pub fn add_user(&self, user: ProviderUser, token: &str) {
        let verified = Self::token_for(&user);
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(token.to_string(), verified);
        }
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.uid.clone(), user);
        }
    }

    pub fn add_credentials(&self, email: &str, password: &str, uid: &str) {
        if let Ok(mut passwords) = self.passwords.lock() {
            passwords.insert(email.to_string(), (password.to_string(), uid.to_string()));
        }
    }

    /// Makes every call wait before answering.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.delay.lock() {
            *d = Some(delay);
        }
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    fn token_for(user: &ProviderUser) -> VerifiedToken {
        let now = Utc::now().timestamp();
        VerifiedToken {
            uid: user.uid.clone(),
            audience: "mock-project".to_string(),
            auth_time: now,
            expires_at: now + 3600,
            email: user.email.clone(),
            email_verified: user.email_verified,
            sign_in_provider: Some("password".to_string()),
            provider_identity_id: None,
        }
    }

    fn issue_session(&self, uid: &str) -> Result<ProviderSession, IdentityError> {
        let user = self.lookup(uid)?;
        let id_token = format!("mock-id-token-{}", uuid::Uuid::new_v4());
        self.add_user(user, &id_token);
        Ok(ProviderSession {
            uid: uid.to_string(),
            id_token,
            refresh_token: format!("mock-refresh-{}", uid),
            expires_in: 3600,
        })
    }

    fn lookup(&self, uid: &str) -> Result<ProviderUser, IdentityError> {
        self.users
            .lock()
            .map_err(|_| IdentityError::Unavailable("mock state poisoned".to_string()))?
            .get(uid)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(uid.to_string()))
    }

    async fn wait(&self) {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, IdentityError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        self.tokens
            .lock()
            .map_err(|_| IdentityError::Unavailable("mock state poisoned".to_string()))?
            .get(token)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidToken("unknown token".to_string()))
    }

    async fn get_user(&self, id_token: &str) -> Result<ProviderUser, IdentityError> {
        self.wait().await;
        let uid = self
            .tokens
            .lock()
            .map_err(|_| IdentityError::Unavailable("mock state poisoned".to_string()))?
            .get(id_token)
            .map(|t| t.uid.clone())
            .ok_or_else(|| IdentityError::InvalidToken("unknown token".to_string()))?;
        self.lookup(&uid)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderSession, IdentityError> {
        self.wait().await;
        let uid = {
            let passwords = self
                .passwords
                .lock()
                .map_err(|_| IdentityError::Unavailable("mock state poisoned".to_string()))?;
            match passwords.get(email) {
                Some((expected, uid)) if expected == password => uid.clone(),
                Some(_) => return Err(IdentityError::Rejected("INVALID_PASSWORD".to_string())),
                None => return Err(IdentityError::Rejected("EMAIL_NOT_FOUND".to_string())),
            }
        };
        self.issue_session(&uid)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderSession, IdentityError> {
        self.wait().await;
        let exists = self
            .passwords
            .lock()
            .map(|p| p.contains_key(email))
            .unwrap_or(false);
        if exists {
            return Err(IdentityError::Rejected("EMAIL_EXISTS".to_string()));
        }

        let uid = format!("uid-{}", uuid::Uuid::new_v4().simple());
        let user = ProviderUser {
            uid: uid.clone(),
            email: Some(email.to_string()),
            phone_number: None,
            display_name: display_name.map(str::to_string),
            photo_url: None,
            email_verified: false,
            disabled: false,
        };
        if let Ok(mut users) = self.users.lock() {
            users.insert(uid.clone(), user);
        }
        self.add_credentials(email, password, &uid);
        self.issue_session(&uid)
    }

    async fn sign_in_link(&self, email: &str, continue_url: &str) -> Result<String, IdentityError> {
        self.wait().await;
        let disabled = self
            .users
            .lock()
            .map_err(|_| IdentityError::Unavailable("mock state poisoned".to_string()))?
            .values()
            .any(|u| u.disabled && u.email.as_deref() == Some(email));
        if disabled {
            return Err(IdentityError::Rejected("USER_DISABLED".to_string()));
        }

        let mut link = reqwest::Url::parse("https://mock-identity.local/emailSignIn")
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        link.query_pairs_mut()
            .append_pair("mode", "signIn")
            .append_pair("oobCode", &uuid::Uuid::new_v4().simple().to_string())
            .append_pair("continueUrl", continue_url);
        Ok(link.into())
    }
}
