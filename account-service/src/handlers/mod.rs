pub mod account_events;
pub mod accounts;
pub mod auth;
pub mod health;
