use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::{collections::HashSet, net::IpAddr, sync::Arc};

use super::client_ip::{client_ip, normalize};

/// Addresses refused before any routing happens.
#[derive(Debug, Clone, Default)]
pub struct IpBlocklist {
    blocked: Arc<HashSet<IpAddr>>,
    exempt_paths: Arc<Vec<String>>,
}

impl IpBlocklist {
    pub fn new(blocked: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            blocked: Arc::new(blocked.into_iter().map(normalize).collect()),
            exempt_paths: Arc::new(vec!["/health".to_string()]),
        }
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.blocked.contains(&normalize(ip))
    }
}

pub async fn ip_blocklist_middleware(
    State(blocklist): State<IpBlocklist>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if blocklist.blocked.is_empty()
        || blocklist
            .exempt_paths
            .iter()
            .any(|p| p == request.uri().path())
    {
        return Ok(next.run(request).await);
    }

    if let Some(ip) = client_ip(&request) {
        if blocklist.is_blocked(ip) {
            tracing::warn!(ip = %ip, "Request from blocked address");
            return Err(AppError::Forbidden(anyhow::anyhow!("Access denied")));
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn app(blocklist: IpBlocklist) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/v1/things", get(|| async { "things" }))
            .layer(from_fn_with_state(blocklist, ip_blocklist_middleware))
    }

    fn request(path: &str, ip: &str) -> Request {
        axum::http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn blocked_address_gets_forbidden() {
        let blocklist = IpBlocklist::new(["198.51.100.4".parse().unwrap()]);
        let response = app(blocklist)
            .oneshot(request("/v1/things", "::ffff:198.51.100.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_is_exempt() {
        let blocklist = IpBlocklist::new(["198.51.100.4".parse().unwrap()]);
        let response = app(blocklist)
            .oneshot(request("/health", "198.51.100.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn other_addresses_pass() {
        let blocklist = IpBlocklist::new(["198.51.100.4".parse().unwrap()]);
        let response = app(blocklist)
            .oneshot(request("/v1/things", "198.51.100.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
