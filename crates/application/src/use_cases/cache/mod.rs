pub mod cached_pipeline;

pub use cached_pipeline::{cache_key, CachedPipeline};
