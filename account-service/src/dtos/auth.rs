use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Account;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[validate(length(min = 5, max = 20, message = "Phone must be 5-20 characters"))]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Passwordless sign-in. `base_url` defaults to the request's `Origin`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginWithLinkRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(url(message = "base_url must be an absolute URL"))]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInLinkResponse {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyEmailRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleRegisterRequest {
    #[serde(default)]
    pub is_provider_anonymous: bool,
}

/// Account plus the provider session issued by a password sign-in/sign-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub account: Account,
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}
