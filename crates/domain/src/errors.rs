use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),

    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("Invalid DNS message: {0}")]
    InvalidDnsMessage(String),

    #[error("Query timeout")]
    QueryTimeout,

    #[error("Entry failed: {0}")]
    EntryFailed(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}
