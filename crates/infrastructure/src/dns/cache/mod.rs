pub mod mem_cache;

pub use mem_cache::MemCache;
