pub mod app_config;
pub mod http_backend;
pub mod redis_repo;

pub use app_config::Config;
pub use http_backend::HttpBookingBackend;
pub use redis_repo::{RedisStore, SessionStores};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
