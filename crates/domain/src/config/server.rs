use super::listener::ListenerConfig;
use serde::{Deserialize, Serialize};

/// One logical DNS server: an entry point and the listeners feeding it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Name of the registered entry that answers queries
    #[serde(default)]
    pub exec: String,

    /// Query timeout in seconds (0 = default)
    #[serde(default)]
    pub timeout: u64,

    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}
