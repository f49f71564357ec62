//! Configuration module for Ferrous Gate
//!
//! This module contains all configuration structures organized by concern:
//! - `root`: Main configuration and CLI overrides
//! - `server`: Server configs (entry, query timeout, listeners)
//! - `listener`: Per-listener settings and protocol tags
//! - `cache`: Response cache settings
//! - `logging`: Logging settings
//! - `local_records`: Local DNS records served by the `local` entry
//! - `errors`: Configuration errors

pub mod cache;
pub mod errors;
pub mod listener;
pub mod local_records;
pub mod logging;
pub mod root;
pub mod server;

pub use cache::CacheConfig;
pub use errors::ConfigError;
pub use listener::{ListenerConfig, ListenerProtocol, DEFAULT_UNIX_SOCKET_PATH};
pub use local_records::LocalDnsRecord;
pub use logging::{LogFormat, LoggingConfig};
pub use root::{CliOverrides, Config};
pub use server::ServerConfig;
