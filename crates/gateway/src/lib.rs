pub mod apikey;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod server;
