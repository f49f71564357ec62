//! DNS transport servers.
//!
//! A [`Server`] owns the shared state of one configured listener: the DNS
//! handler, optional HTTP handler and TLS material, the idle timeout, and a
//! shutdown token. Each `serve_*` method runs one accept or read loop until
//! the token fires, and always returns an error; [`ServerError::ServerClosed`]
//! marks an orderly shutdown.

#[cfg(target_os = "linux")]
mod cmsg;
mod error;
pub mod http;
pub mod lifecycle;
pub mod listener;
pub mod proxy_protocol;
pub mod supervisor;
mod tcp;
pub mod tls;
pub mod udp;
pub mod unix;

pub use error::ServerError;
pub use http::HttpHandler;
pub use listener::StreamListener;
pub use udp::{Datagram, PacketConn, UdpConn};

use ferrous_gate_application::ports::DnsHandler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Idle timeout applied to stream connections when none is configured.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
pub struct ServerOpts {
    pub dns_handler: Option<Arc<dyn DnsHandler>>,
    pub http_handler: Option<Arc<HttpHandler>>,
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// Zero selects [`DEFAULT_IDLE_TIMEOUT`].
    pub idle_timeout: Duration,
}

pub struct Server {
    opts: ServerOpts,
    shutdown: CancellationToken,
    listeners: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(opts: ServerOpts) -> Self {
        Self::with_shutdown(opts, CancellationToken::new())
    }

    /// Create a server that closes when `shutdown` is cancelled.
    pub fn with_shutdown(opts: ServerOpts, shutdown: CancellationToken) -> Self {
        Self {
            opts,
            shutdown,
            listeners: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Close the server. Every running serve loop returns
    /// [`ServerError::ServerClosed`] and in-flight queries are abandoned.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn active_listeners(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    pub fn idle_timeout(&self) -> Duration {
        if self.opts.idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            self.opts.idle_timeout
        }
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn dns_handler(&self) -> Result<Arc<dyn DnsHandler>, ServerError> {
        self.opts
            .dns_handler
            .clone()
            .ok_or(ServerError::MissingDnsHandler)
    }

    pub(crate) fn http_handler(&self) -> Result<Arc<HttpHandler>, ServerError> {
        self.opts
            .http_handler
            .clone()
            .ok_or(ServerError::MissingHttpHandler)
    }

    pub(crate) fn tls_config(&self) -> Result<Arc<rustls::ServerConfig>, ServerError> {
        self.opts
            .tls_config
            .clone()
            .ok_or(ServerError::MissingTlsConfig)
    }

    /// Register a live listener. Returns `None` once the server is closed.
    pub(crate) fn track(&self) -> Option<Tracked> {
        let tracked = Tracked::new(&self.listeners);
        if self.closed() {
            return None;
        }
        Some(tracked)
    }

    /// Register a live stream connection.
    pub(crate) fn track_connection(&self) -> Tracked {
        Tracked::new(&self.connections)
    }
}

/// Decrements its counter when dropped.
pub(crate) struct Tracked {
    count: Arc<AtomicUsize>,
}

impl Tracked {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self {
            count: Arc::clone(count),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}
