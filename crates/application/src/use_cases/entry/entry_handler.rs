use crate::message::error_reply;
use crate::ports::{DnsHandler, QueryPipeline};
use async_trait::async_trait;
use ferrous_gate_domain::{DomainError, RequestMeta};
use hickory_proto::op::{Message, ResponseCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Query timeout used when the server config leaves `timeout` at zero.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EntryHandlerOpts {
    pub entry: Arc<dyn QueryPipeline>,
    pub query_timeout: Duration,
    pub recursion_available: bool,
}

/// Wraps an entry with the query deadline and the reply policy shared by
/// every listener of a server config.
///
/// Entry error or deadline → SERVFAIL, no response from the entry →
/// REFUSED. The handler itself always answers.
pub struct EntryHandler {
    entry: Arc<dyn QueryPipeline>,
    query_timeout: Duration,
    recursion_available: bool,
}

impl EntryHandler {
    pub fn new(opts: EntryHandlerOpts) -> Self {
        let query_timeout = if opts.query_timeout.is_zero() {
            DEFAULT_QUERY_TIMEOUT
        } else {
            opts.query_timeout
        };

        Self {
            entry: opts.entry,
            query_timeout,
            recursion_available: opts.recursion_available,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }
}

#[async_trait]
impl DnsHandler for EntryHandler {
    async fn serve_dns(
        &self,
        query: &Message,
        meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        let outcome = tokio::time::timeout(self.query_timeout, self.entry.exec(query, meta))
            .await
            .unwrap_or(Err(DomainError::QueryTimeout));

        let mut response = match outcome {
            Ok(Some(response)) => response,
            Ok(None) => {
                debug!(id = query.id(), "Entry produced no response, refusing");
                error_reply(query, ResponseCode::Refused)
            }
            Err(e) => {
                warn!(
                    id = query.id(),
                    question = ?query.queries().first().map(|q| q.name().to_string()),
                    client = ?meta.client_addr,
                    error = %e,
                    "Entry error"
                );
                error_reply(query, ResponseCode::ServFail)
            }
        };

        if self.recursion_available {
            response.set_recursion_available(true);
        }

        Ok(Some(response))
    }
}
