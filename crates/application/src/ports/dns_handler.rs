use async_trait::async_trait;
use ferrous_gate_domain::{DomainError, RequestMeta};
use hickory_proto::op::Message;

/// What every transport calls for a parsed query.
///
/// `Ok(None)` means the handler declines to answer and the transport sends
/// nothing back. Implementations must return promptly once the surrounding
/// task is cancelled; transports drop the future on shutdown.
#[async_trait]
pub trait DnsHandler: Send + Sync {
    async fn serve_dns(
        &self,
        query: &Message,
        meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError>;
}
