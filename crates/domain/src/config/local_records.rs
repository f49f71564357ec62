use super::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Local DNS record answered by the built-in `local` entry
///
/// Provides static IP address mapping for local hostnames without requiring
/// a full zone file. The record type follows the address family: A for
/// IPv4, AAAA for IPv6.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalDnsRecord {
    /// Hostname (e.g., "nas", "server", "printer")
    /// Combined with `domain` to form the FQDN
    pub hostname: String,

    /// Optional domain (e.g., "home.lan", "lab.local")
    #[serde(default)]
    pub domain: Option<String>,

    /// IP address (IPv4 or IPv6)
    pub ip: String,

    /// Time-to-live in seconds (optional, default 300)
    #[serde(default)]
    pub ttl: Option<u32>,
}

impl LocalDnsRecord {
    /// Build fully qualified domain name from hostname and domain
    ///
    /// # Examples
    /// ```
    /// use ferrous_gate_domain::config::LocalDnsRecord;
    ///
    /// let record = LocalDnsRecord {
    ///     hostname: "nas".into(),
    ///     domain: Some("lab.local".into()),
    ///     ip: "192.168.1.100".into(),
    ///     ttl: None,
    /// };
    /// assert_eq!(record.fqdn(), "nas.lab.local");
    /// ```
    pub fn fqdn(&self) -> String {
        match self.domain {
            Some(ref domain) => format!("{}.{}", self.hostname, domain),
            None => self.hostname.clone(),
        }
    }

    pub fn ip_addr(&self) -> Result<IpAddr, ConfigError> {
        self.ip
            .parse()
            .map_err(|_| ConfigError::InvalidLocalRecord {
                hostname: self.hostname.clone(),
                reason: format!("invalid IP address '{}'", self.ip),
            })
    }

    /// Get TTL with default fallback
    pub fn ttl_or_default(&self) -> u32 {
        self.ttl.unwrap_or(300)
    }
}
