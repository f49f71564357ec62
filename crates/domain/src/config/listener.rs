use super::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Unix-domain socket used by `http` listeners and `tcp` listeners with
/// `unix = true` when no `socket_path` is configured.
pub const DEFAULT_UNIX_SOCKET_PATH: &str = "/tmp/go-unix-socket";

/// Transport a listener speaks, parsed from the config tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerProtocol {
    /// `""` or `udp`
    Udp,
    /// `tcp`
    Tcp,
    /// `tls` or `dot`
    Tls,
    /// `http`: plain HTTP over a Unix-domain socket, for a local reverse proxy
    Http,
    /// `https` or `doh`
    Https,
}

impl ListenerProtocol {
    pub fn from_tag(tag: &str) -> Result<Self, ConfigError> {
        match tag {
            "" | "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "tls" | "dot" => Ok(Self::Tls),
            "http" => Ok(Self::Http),
            "https" | "doh" => Ok(Self::Https),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Tls => "tls",
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Tls | Self::Https)
    }
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured endpoint of a server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Bind address, e.g. "0.0.0.0:53" or "[::]:853"
    #[serde(default)]
    pub addr: String,

    /// Protocol tag: "", "udp", "tcp", "tls", "dot", "http", "https", "doh"
    #[serde(default)]
    pub protocol: String,

    /// Idle timeout for stream connections in seconds (0 = default)
    #[serde(default)]
    pub idle_timeout: u64,

    /// PEM certificate chain (tls/dot/https/doh)
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// PEM private key (tls/dot/https/doh)
    #[serde(default)]
    pub key: Option<PathBuf>,

    /// Serve `tcp` on a Unix-domain socket instead of `addr`
    #[serde(default)]
    pub unix: bool,

    /// Unix-domain socket path override; defaults to `DEFAULT_UNIX_SOCKET_PATH`
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Require a PROXY protocol header on every accepted connection
    #[serde(default)]
    pub proxy_protocol: bool,

    /// URL path for DNS-over-HTTP(S) requests
    #[serde(default)]
    pub url_path: String,

    /// Trusted header carrying the real client IP behind a reverse proxy
    #[serde(default)]
    pub get_user_ip_from_header: String,
}

impl ListenerConfig {
    pub fn new(protocol: &str, addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            protocol: protocol.to_string(),
            ..Default::default()
        }
    }

    /// Whether this listener binds a Unix-domain socket rather than `addr`.
    pub fn uses_unix_socket(&self) -> bool {
        match ListenerProtocol::from_tag(&self.protocol) {
            Ok(ListenerProtocol::Http) => true,
            Ok(ListenerProtocol::Tcp) => self.unix,
            _ => false,
        }
    }

    /// Socket path for Unix-domain listeners.
    pub fn unix_socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UNIX_SOCKET_PATH))
    }
}
