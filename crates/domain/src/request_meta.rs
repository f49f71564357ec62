use std::net::IpAddr;

/// Per-query metadata handed to the entry handler alongside the query.
///
/// Lives only for the duration of one query; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Client address with the port stripped. `None` for peers that have no
    /// IP identity, e.g. a Unix-domain connection without a PROXY header.
    pub client_addr: Option<IpAddr>,
}

impl RequestMeta {
    pub fn new(client_addr: Option<IpAddr>) -> Self {
        Self { client_addr }
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            client_addr: Some(ip),
        }
    }
}
