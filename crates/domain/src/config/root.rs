use super::cache::CacheConfig;
use super::errors::ConfigError;
use super::listener::ListenerProtocol;
use super::local_records::LocalDnsRecord;
use super::logging::LoggingConfig;
use super::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration, loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub local_records: Vec<LocalDnsRecord>,

    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Command line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from `path`, or defaults when no path is given,
    /// then apply CLI overrides.
    pub fn load(path: Option<&str>, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(level) = overrides.log_level {
            config.logging.level = level;
        }

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Static checks that do not need the runtime. Entry resolution and
    /// socket binding are checked when the servers start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;

        for record in &self.local_records {
            record.ip_addr()?;
        }

        for server in &self.servers {
            for listener in &server.listeners {
                let protocol = ListenerProtocol::from_tag(&listener.protocol)?;
                if protocol.requires_tls() && (listener.cert.is_none() || listener.key.is_none())
                {
                    return Err(ConfigError::MissingTlsMaterial {
                        addr: listener.addr.clone(),
                        protocol: protocol.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
