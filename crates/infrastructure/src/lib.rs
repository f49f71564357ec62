pub mod dns;
pub mod pool;
pub mod server;

pub use dns::cache::MemCache;
pub use server::lifecycle::{Lifecycle, ShutdownCause};
pub use server::supervisor::{BoundListener, ServerSupervisor, StartupError};
pub use server::{Server, ServerError, ServerOpts};
