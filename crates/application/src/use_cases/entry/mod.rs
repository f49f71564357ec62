pub mod entry_handler;
pub mod registry;

pub use entry_handler::{EntryHandler, EntryHandlerOpts, DEFAULT_QUERY_TIMEOUT};
pub use registry::PipelineRegistry;
