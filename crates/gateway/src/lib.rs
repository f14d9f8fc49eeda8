pub mod config;
pub mod csv;
pub mod export;
pub mod http;
pub mod metrics;
pub mod query;
pub mod source;
