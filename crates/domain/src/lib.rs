//! Ferrous Gate Domain Layer
pub mod config;
pub mod errors;
pub mod request_meta;

pub use config::{
    CacheConfig, CliOverrides, Config, ConfigError, ListenerConfig, ListenerProtocol,
    LocalDnsRecord, LoggingConfig, ServerConfig,
};
pub use errors::DomainError;
pub use request_meta::RequestMeta;
