use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown protocol: [{0}]")]
    UnknownProtocol(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("Invalid local record {hostname}: {reason}")]
    InvalidLocalRecord { hostname: String, reason: String },

    #[error("Listener {addr} ({protocol}) requires both cert and key")]
    MissingTlsMaterial { addr: String, protocol: String },
}
