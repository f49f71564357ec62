pub mod cache;
pub mod message;

pub use cache::MemCache;
pub use message::{truncate, udp_size, MIN_UDP_SIZE};
