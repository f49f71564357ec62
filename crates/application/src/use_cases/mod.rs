pub mod cache;
pub mod entry;
pub mod local;

// Re-export use cases
pub use cache::{cache_key, CachedPipeline};
pub use entry::{EntryHandler, EntryHandlerOpts, PipelineRegistry, DEFAULT_QUERY_TIMEOUT};
pub use local::LocalRecordsPipeline;
