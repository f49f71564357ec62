pub mod dns_handler;
pub mod query_pipeline;
pub mod response_cache;

pub use dns_handler::DnsHandler;
pub use query_pipeline::QueryPipeline;
pub use response_cache::{CachedResponse, ResponseCache};
