use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::net::IpAddr;
use validator::ValidateEmail;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub identity: IdentityProviderConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    /// Administrator created at startup when no account holds its email.
    pub admin_seed: Option<AdminSeedConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound for a single store call, transactions included.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub api_key: String,
    /// Base URL of the provider's REST API, e.g. `https://identitytoolkit.googleapis.com/v1`.
    pub auth_api_url: String,
    pub project_id: String,
    pub jwks_url: String,
    /// Required for operations the API key alone cannot perform (sign-in links).
    pub service_account: Option<ServiceAccountConfig>,
    pub timeout_ms: u64,
}

/// Google service account exchanged for short-lived OAuth access tokens.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountConfig {
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountConfig")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminSeedConfig {
    pub email: String,
    pub name: String,
}

/// Origins accepted by the authorization guard.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            AllowedOrigins::Any => true,
            AllowedOrigins::List(origins) => origins.iter().any(|o| o == origin),
        }
    }
}

impl std::str::FromStr for AllowedOrigins {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "*" {
            return Ok(AllowedOrigins::Any);
        }

        let origins: Vec<String> = trimmed
            .split(',')
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();

        if origins.is_empty() {
            return Err("ORIGIN must be '*' or a comma-separated list of origins".to_string());
        }
        Ok(AllowedOrigins::List(origins))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: AllowedOrigins,
    /// Label expected in the client API key (`<label>_<epoch millis>`).
    pub app_name: String,
    pub client_api_key_enabled: bool,
    pub client_api_key_window_ms: i64,
    /// Timestamp value that skips the freshness check.
    pub client_api_key_bypass: String,
    pub blacklisted_ips: Vec<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
}

impl AccountConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AccountConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("account-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                timeout_ms: parse_env("DATABASE_TIMEOUT_MS", "5000", is_prod)?,
            },
            identity: IdentityProviderConfig {
                api_key: get_env("IDENTITY_API_KEY", None, is_prod)?,
                auth_api_url: get_env(
                    "IDENTITY_AUTH_API",
                    Some("https://identitytoolkit.googleapis.com/v1"),
                    is_prod,
                )?,
                project_id: get_env("IDENTITY_PROJECT_ID", None, is_prod)?,
                jwks_url: get_env(
                    "IDENTITY_JWKS_URL",
                    Some("https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"),
                    is_prod,
                )?,
                service_account: service_account_from_env()?,
                timeout_ms: parse_env("IDENTITY_TIMEOUT_MS", "5000", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ORIGIN", Some("*"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                app_name: get_env("APP_NAME", Some("rennan-api"), false)?,
                client_api_key_enabled: parse_env("FF_CLIENT_API_KEY_ENABLED", "false", false)?,
                client_api_key_window_ms: parse_env("CLIENT_API_KEY_WINDOW_MS", "300000", false)?,
                client_api_key_bypass: get_env("CLIENT_API_KEY_BYPASS", Some("420"), false)?,
                blacklisted_ips: parse_ip_list(&get_env("BLACKLISTED_IPS", Some(""), false)?)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", false)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", false)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "3", false)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    "3600",
                    false,
                )?,
            },
            admin_seed: optional_env("ADMIN_EMAIL")
                .map(|email| {
                    Ok::<_, AppError>(AdminSeedConfig {
                        email,
                        name: get_env("ADMIN_NAME", Some("Administrator"), false)?,
                    })
                })
                .transpose()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.security.client_api_key_window_ms <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CLIENT_API_KEY_WINDOW_MS must be positive"
            )));
        }

        if self.security.app_name.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "APP_NAME must not be empty"
            )));
        }

        if let Some(seed) = &self.admin_seed {
            if !seed.email.validate_email() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "ADMIN_EMAIL '{}' is not a valid email",
                    seed.email
                )));
            }
        }

        if self.database.timeout_ms == 0 || self.identity.timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_TIMEOUT_MS and IDENTITY_TIMEOUT_MS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins == AllowedOrigins::Any {
                tracing::warn!("ORIGIN is '*' in production; origin checks are disabled");
            }
            if !self.security.client_api_key_enabled {
                tracing::warn!("Client API key check is disabled in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Present only when both the client email and the private key are set.
fn service_account_from_env() -> Result<Option<ServiceAccountConfig>, AppError> {
    match (optional_env("IDENTITY_CLIENT_EMAIL"), optional_env("IDENTITY_PRIVATE_KEY")) {
        (Some(client_email), Some(private_key)) => Ok(Some(ServiceAccountConfig {
            client_email,
            // Keys pasted into env files usually carry escaped newlines.
            private_key: private_key.replace("\\n", "\n"),
            token_uri: get_env(
                "IDENTITY_TOKEN_URI",
                Some("https://oauth2.googleapis.com/token"),
                false,
            )?,
        })),
        (None, None) => Ok(None),
        _ => Err(AppError::ConfigError(anyhow::anyhow!(
            "IDENTITY_CLIENT_EMAIL and IDENTITY_PRIVATE_KEY must be set together"
        ))),
    }
}

fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("BLACKLISTED_IPS entry '{}': {}", s, e))
            })
        })
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_origin_allows_everything() {
        let origins: AllowedOrigins = "*".parse().unwrap();
        assert_eq!(origins, AllowedOrigins::Any);
        assert!(origins.allows("https://anything.example"));
    }

    #[test]
    fn origin_list_matches_exactly() {
        let origins: AllowedOrigins = "https://app.example.com/, http://localhost:3000"
            .parse()
            .unwrap();
        assert!(origins.allows("https://app.example.com"));
        assert!(origins.allows("http://localhost:3000"));
        assert!(!origins.allows("https://app.example.com.evil.io"));
        assert!(!origins.allows("http://localhost"));
    }

    #[test]
    fn empty_origin_list_is_rejected() {
        assert!(" , ".parse::<AllowedOrigins>().is_err());
    }

    #[test]
    fn ip_list_parses_v4_and_v6() {
        let ips = parse_ip_list("10.0.0.1, ::1,").unwrap();
        assert_eq!(ips.len(), 2);
        assert!(parse_ip_list("not-an-ip").is_err());
    }

    #[test]
    fn environment_aliases() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }
}
