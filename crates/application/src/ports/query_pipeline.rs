use async_trait::async_trait;
use ferrous_gate_domain::{DomainError, RequestMeta};
use hickory_proto::op::Message;

/// A named entry that produces answers, resolved by name from the config's
/// `exec` field.
///
/// Returning `Ok(None)` means the entry produced no response; the entry
/// handler turns that into REFUSED.
#[async_trait]
pub trait QueryPipeline: Send + Sync {
    async fn exec(
        &self,
        query: &Message,
        meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError>;
}
