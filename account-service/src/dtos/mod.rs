pub mod account;
pub mod account_event;
pub mod auth;
pub mod pagination;

pub use pagination::{Paginated, PaginationMeta, PaginationParams, ResponseMeta};
