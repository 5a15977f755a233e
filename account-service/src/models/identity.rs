//! Identities asserted by the external identity provider.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Claims of a verified bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedToken {
    pub uid: String,
    pub audience: String,
    /// Seconds since the epoch.
    pub auth_time: i64,
    pub expires_at: i64,
    pub email: Option<String>,
    pub email_verified: bool,
    pub sign_in_provider: Option<String>,
    /// Subject id at the upstream provider the user signed in with (e.g. Google).
    pub provider_identity_id: Option<String>,
}

/// A user record held by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub uid: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
    pub disabled: bool,
}

/// Tokens issued by a password sign-in or sign-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub uid: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// The authenticated caller of the current request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
    pub auth_time: Option<DateTime<Utc>>,
    pub expiry_time: Option<DateTime<Utc>>,
    pub provider_name: Option<String>,
    pub provider_audience: Option<String>,
    pub provider_subject_id: String,
    pub provider_identity_id: Option<String>,
}

impl Identity {
    pub fn from_provider(token: &VerifiedToken, user: &ProviderUser) -> Self {
        Self {
            subject_id: user.uid.clone(),
            email: user.email.clone().or_else(|| token.email.clone()),
            phone: user.phone_number.clone(),
            display_name: user.display_name.clone(),
            photo_url: user.photo_url.clone(),
            email_verified: user.email_verified || token.email_verified,
            auth_time: Utc.timestamp_opt(token.auth_time, 0).single(),
            expiry_time: Utc.timestamp_opt(token.expires_at, 0).single(),
            provider_name: token.sign_in_provider.clone(),
            provider_audience: Some(token.audience.clone()),
            provider_subject_id: token.uid.clone(),
            provider_identity_id: token.provider_identity_id.clone(),
        }
    }
}
