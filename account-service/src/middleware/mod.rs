pub mod authorization;
pub mod routes;

pub use authorization::{
    authorization_middleware, validate_client_api_key, AuthorizationDecision, AuthorizationFailure,
    AuthorizationGuard, CurrentAccount, CurrentIdentity, GuardSettings,
};
pub use routes::{policy_for, RoutePolicy};
