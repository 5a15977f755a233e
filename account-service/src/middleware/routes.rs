//! Static route policy table read by the authorization guard.

use axum::http::Method;

use crate::models::Role;

pub mod paths {
    pub const HEALTH: &str = "/health";
    pub const HEALTHCHECK: &str = "/healthcheck";
    pub const HEALTHCHECK_DATABASE: &str = "/healthcheck-database";
    pub const METRICS: &str = "/metrics";

    pub const VERIFY_EMAIL: &str = "/v1/auth/verify-email";
    pub const REGISTER: &str = "/v1/auth/register";
    pub const LOGIN: &str = "/v1/auth/login";
    pub const LOGIN_WITH_LINK: &str = "/v1/auth/login-with-link";
    pub const GOOGLE_REGISTER: &str = "/v1/auth/google/register";
    pub const GOOGLE_LOGIN: &str = "/v1/auth/google/login";
    pub const ME: &str = "/v1/auth/me";
    pub const LOGOUT: &str = "/v1/auth/logout";

    pub const ACCOUNTS: &str = "/v1/accounts";
    pub const ACCOUNT: &str = "/v1/accounts/:account_id";
    pub const ACCOUNT_EVENTS: &str = "/v1/account-events";
    pub const ACCOUNT_EVENT: &str = "/v1/account-events/:event_id";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    pub public: bool,
    /// Empty means any authenticated caller.
    pub roles: &'static [Role],
}

impl RoutePolicy {
    pub const PUBLIC: RoutePolicy = RoutePolicy {
        public: true,
        roles: &[],
    };

    pub const AUTHENTICATED: RoutePolicy = RoutePolicy {
        public: false,
        roles: &[],
    };

    pub const fn roles(roles: &'static [Role]) -> Self {
        RoutePolicy {
            public: false,
            roles,
        }
    }

    pub fn requires_roles(&self) -> bool {
        !self.roles.is_empty()
    }
}

const ADMIN: RoutePolicy = RoutePolicy::roles(&[Role::Admin]);
const STAFF: RoutePolicy = RoutePolicy::roles(&[Role::Admin, Role::Moderator]);

const POLICIES: &[(&str, &str, RoutePolicy)] = &[
    ("GET", paths::HEALTH, RoutePolicy::PUBLIC),
    ("GET", paths::HEALTHCHECK, RoutePolicy::PUBLIC),
    ("GET", paths::HEALTHCHECK_DATABASE, RoutePolicy::PUBLIC),
    ("GET", paths::METRICS, RoutePolicy::PUBLIC),
    ("POST", paths::VERIFY_EMAIL, RoutePolicy::PUBLIC),
    ("POST", paths::REGISTER, RoutePolicy::PUBLIC),
    ("POST", paths::LOGIN, RoutePolicy::PUBLIC),
    ("POST", paths::LOGIN_WITH_LINK, RoutePolicy::PUBLIC),
    ("POST", paths::GOOGLE_REGISTER, RoutePolicy::AUTHENTICATED),
    ("POST", paths::GOOGLE_LOGIN, RoutePolicy::AUTHENTICATED),
    ("GET", paths::ME, RoutePolicy::AUTHENTICATED),
    ("POST", paths::LOGOUT, RoutePolicy::AUTHENTICATED),
    ("GET", paths::ACCOUNTS, ADMIN),
    ("GET", paths::ACCOUNT, ADMIN),
    ("PATCH", paths::ACCOUNT, ADMIN),
    ("DELETE", paths::ACCOUNT, ADMIN),
    ("GET", paths::ACCOUNT_EVENTS, STAFF),
    ("GET", paths::ACCOUNT_EVENT, STAFF),
    ("DELETE", paths::ACCOUNT_EVENT, ADMIN),
];

/// Policy of a matched route. Routes missing from the table are private.
pub fn policy_for(method: &Method, path: &str) -> RoutePolicy {
    // HEAD requests are served by GET handlers.
    let method = if *method == Method::HEAD {
        Method::GET.as_str()
    } else {
        method.as_str()
    };

    POLICIES
        .iter()
        .find(|(m, p, _)| *m == method && *p == path)
        .map(|(_, _, policy)| *policy)
        .unwrap_or(RoutePolicy::AUTHENTICATED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operational_routes_are_public() {
        for path in [paths::HEALTH, paths::HEALTHCHECK, paths::METRICS] {
            assert!(policy_for(&Method::GET, path).public);
        }
        assert!(policy_for(&Method::HEAD, paths::HEALTH).public);
    }

    #[test]
    fn sign_in_entry_points_are_public() {
        for path in [paths::LOGIN, paths::LOGIN_WITH_LINK, paths::REGISTER] {
            assert!(policy_for(&Method::POST, path).public);
        }
    }

    #[test]
    fn account_routes_require_admin() {
        let policy = policy_for(&Method::DELETE, paths::ACCOUNT);
        assert!(!policy.public);
        assert_eq!(policy.roles, &[Role::Admin]);
    }

    #[test]
    fn event_reads_allow_moderators_but_deletes_do_not() {
        assert!(policy_for(&Method::GET, paths::ACCOUNT_EVENT)
            .roles
            .contains(&Role::Moderator));
        assert_eq!(
            policy_for(&Method::DELETE, paths::ACCOUNT_EVENT).roles,
            &[Role::Admin]
        );
    }

    #[test]
    fn unknown_routes_default_to_private() {
        assert_eq!(
            policy_for(&Method::POST, "/v1/unknown"),
            RoutePolicy::AUTHENTICATED
        );
        assert_eq!(
            policy_for(&Method::POST, paths::HEALTH),
            RoutePolicy::AUTHENTICATED
        );
    }
}
