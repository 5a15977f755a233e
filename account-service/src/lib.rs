pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use service_core::middleware::{
    blocklist::{ip_blocklist_middleware, IpBlocklist},
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{AccountConfig, AllowedOrigins};
use crate::middleware::routes::paths;
use crate::middleware::{authorization_middleware, AuthorizationGuard, GuardSettings};
use crate::repositories::{AccountEventRepository, AccountRepository};
use crate::services::{
    AccountDirectory, AccountEventAuditor, AccountEventService, AccountService, AuthService,
    IdentityProvider,
};
use crate::store::{chain::persistence_chain, Store};

#[derive(Clone)]
pub struct AppState {
    pub config: AccountConfig,
    /// The persistence chain; every repository goes through it.
    pub store: Arc<dyn Store>,
    pub guard: AuthorizationGuard,
    pub accounts: AccountService,
    pub account_events: AccountEventService,
    pub auth: AuthService,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wires every service over `base_store` wrapped in the persistence chain.
    pub fn new(
        config: AccountConfig,
        base_store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let store: Arc<dyn Store> = Arc::new(persistence_chain(base_store));

        let account_repo = AccountRepository::new(store.clone());
        let event_repo = AccountEventRepository::new(store.clone());
        let directory = AccountDirectory::new(account_repo.clone());
        let auditor = AccountEventAuditor::new(account_repo.clone(), event_repo.clone());

        let guard = AuthorizationGuard::new(
            GuardSettings::from_config(&config),
            identity.clone(),
            directory.clone(),
            auditor.clone(),
        );
        let auth = AuthService::new(
            account_repo.clone(),
            directory,
            auditor,
            identity,
            config.security.app_name.clone(),
        );

        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );
        let register_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.register_attempts,
            config.rate_limit.register_window_seconds,
        );

        Self {
            config,
            store,
            guard,
            accounts: AccountService::new(account_repo),
            account_events: AccountEventService::new(event_repo),
            auth,
            login_rate_limiter,
            register_rate_limiter,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let login_route = Router::new()
        .route(paths::LOGIN, post(handlers::auth::login))
        .route(paths::LOGIN_WITH_LINK, post(handlers::auth::login_with_link))
        .route_layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route(paths::REGISTER, post(handlers::auth::register))
        .route_layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let app = Router::new()
        .route(paths::HEALTH, get(handlers::health::health))
        .route(paths::HEALTHCHECK, get(handlers::health::healthcheck))
        .route(
            paths::HEALTHCHECK_DATABASE,
            get(handlers::health::healthcheck_database),
        )
        .route(paths::METRICS, get(handlers::health::metrics))
        .route(paths::VERIFY_EMAIL, post(handlers::auth::verify_email))
        .merge(login_route)
        .merge(register_route)
        .route(paths::GOOGLE_REGISTER, post(handlers::auth::google_register))
        .route(paths::GOOGLE_LOGIN, post(handlers::auth::google_login))
        .route(paths::ME, get(handlers::auth::me))
        .route(paths::LOGOUT, post(handlers::auth::logout))
        .route(paths::ACCOUNTS, get(handlers::accounts::list_accounts))
        .route(
            paths::ACCOUNT,
            get(handlers::accounts::get_account)
                .patch(handlers::accounts::update_account)
                .delete(handlers::accounts::delete_account),
        )
        .route(
            paths::ACCOUNT_EVENTS,
            get(handlers::account_events::list_account_events),
        )
        .route(
            paths::ACCOUNT_EVENT,
            get(handlers::account_events::get_account_event)
                .delete(handlers::account_events::delete_account_event),
        )
        // Authorization guard, after routing so the matched path is known
        .route_layer(from_fn_with_state(state.clone(), authorization_middleware))
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn_with_state(
            IpBlocklist::new(state.config.security.blacklisted_ips.iter().copied()),
            ip_blocklist_middleware,
        ))
        .layer(cors_layer(&state.config.security.allowed_origins));

    Ok(app)
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::any(),
        AllowedOrigins::List(list) => AllowOrigin::list(list.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}': {}", o, e))
                .ok()
        })),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("client-api-key"),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}
