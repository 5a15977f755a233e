pub mod blocklist;
pub mod client_ip;
pub mod metrics;
pub mod rate_limit;
pub mod security_headers;
pub mod tracing;
