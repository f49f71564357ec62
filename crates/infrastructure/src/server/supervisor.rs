use super::http::{HttpHandler, HttpHandlerError, HttpHandlerOpts};
use super::lifecycle::Lifecycle;
use super::listener::StreamListener;
use super::tls::{self, TlsError};
use super::unix::create_unix_listener;
use super::{Server, ServerOpts, DEFAULT_IDLE_TIMEOUT};
use ferrous_gate_application::ports::DnsHandler;
use ferrous_gate_application::use_cases::{
    EntryHandler, EntryHandlerOpts, PipelineRegistry, DEFAULT_QUERY_TIMEOUT,
};
use ferrous_gate_domain::{ConfigError, ListenerConfig, ListenerProtocol, ServerConfig};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tracing::info;

const TCP_BACKLOG: i32 = 1024;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("no server listener is configured")]
    NoListeners,

    #[error("empty entry")]
    EmptyEntry,

    #[error("cannot find entry {0}")]
    UnknownEntry(String),

    #[error("no address to bind")]
    NoBindAddress,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unix socket path {0} is used by more than one listener")]
    DuplicateSocketPath(PathBuf),

    #[error("failed to init http handler, {0}")]
    HttpHandler(#[from] HttpHandlerError),

    #[error("failed to load tls material, {0}")]
    Tls(#[from] TlsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// What a started listener ended up bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundListener {
    pub protocol: ListenerProtocol,
    pub local_addr: Option<SocketAddr>,
    pub socket_path: Option<PathBuf>,
}

/// Starts the listeners of server configs and registers their loops with a
/// shared [`Lifecycle`].
pub struct ServerSupervisor {
    registry: Arc<PipelineRegistry>,
    lifecycle: Arc<Lifecycle>,
}

impl ServerSupervisor {
    pub fn new(registry: Arc<PipelineRegistry>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            registry,
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Resolve the entry of `cfg` and start every listener under one DNS
    /// handler. Stops at the first listener that fails to start; listeners
    /// already started keep running until the lifecycle closes.
    pub async fn start_servers(&self, cfg: &ServerConfig) -> Result<Vec<BoundListener>, StartupError> {
        if cfg.listeners.is_empty() {
            return Err(StartupError::NoListeners);
        }
        if cfg.exec.is_empty() {
            return Err(StartupError::EmptyEntry);
        }
        let entry = self
            .registry
            .get(&cfg.exec)
            .ok_or_else(|| StartupError::UnknownEntry(cfg.exec.clone()))?;

        check_socket_paths(&cfg.listeners)?;

        let query_timeout = if cfg.timeout > 0 {
            Duration::from_secs(cfg.timeout)
        } else {
            DEFAULT_QUERY_TIMEOUT
        };
        let dns_handler: Arc<dyn DnsHandler> = Arc::new(EntryHandler::new(EntryHandlerOpts {
            entry,
            query_timeout,
            recursion_available: true,
        }));

        let mut bound = Vec::with_capacity(cfg.listeners.len());
        for listener in &cfg.listeners {
            bound.push(self.start_server_listener(listener, Arc::clone(&dns_handler)).await?);
        }
        Ok(bound)
    }

    /// Bind one listener and attach its serve loop to the lifecycle.
    pub async fn start_server_listener(
        &self,
        cfg: &ListenerConfig,
        dns_handler: Arc<dyn DnsHandler>,
    ) -> Result<BoundListener, StartupError> {
        if cfg.addr.is_empty() && !cfg.uses_unix_socket() {
            return Err(StartupError::NoBindAddress);
        }
        let protocol = ListenerProtocol::from_tag(&cfg.protocol)?;

        info!(proto = %protocol, addr = %cfg.addr, "Starting server");

        let idle_timeout = if cfg.idle_timeout > 0 {
            Duration::from_secs(cfg.idle_timeout)
        } else {
            DEFAULT_IDLE_TIMEOUT
        };

        let http_handler = match protocol {
            ListenerProtocol::Http | ListenerProtocol::Https => Some(Arc::new(HttpHandler::new(HttpHandlerOpts {
                dns_handler: Arc::clone(&dns_handler),
                path: cfg.url_path.clone(),
                src_ip_header: cfg.get_user_ip_from_header.clone(),
            })?)),
            _ => None,
        };

        let tls_config = match protocol {
            ListenerProtocol::Tls => Some(load_tls(cfg, tls::DOT_ALPN)?),
            ListenerProtocol::Https => Some(load_tls(cfg, tls::DOH_ALPN)?),
            _ => None,
        };

        let server = Arc::new(Server::with_shutdown(
            ServerOpts {
                dns_handler: Some(dns_handler),
                http_handler,
                tls_config,
                idle_timeout,
            },
            self.lifecycle.token().child_token(),
        ));

        let name = format!("{}://{}", protocol, cfg.addr);

        let bound = match protocol {
            ListenerProtocol::Udp => {
                let socket = bind_udp(&cfg.addr)?;
                let local_addr = socket.local_addr().ok();
                self.lifecycle
                    .attach(name, async move { server.serve_udp(socket).await });
                BoundListener {
                    protocol,
                    local_addr,
                    socket_path: None,
                }
            }
            ListenerProtocol::Tcp | ListenerProtocol::Tls | ListenerProtocol::Https | ListenerProtocol::Http => {
                let listener = if cfg.uses_unix_socket() {
                    let path = cfg.unix_socket_path();
                    let unix = create_unix_listener(&path).map_err(|source| StartupError::Bind {
                        addr: path.display().to_string(),
                        source,
                    })?;
                    StreamListener::unix(unix, path)
                } else {
                    StreamListener::tcp(bind_tcp(&cfg.addr)?)
                };
                let listener = listener.with_proxy_protocol(cfg.proxy_protocol);

                let bound = BoundListener {
                    protocol,
                    local_addr: listener.local_addr(),
                    socket_path: listener.socket_path().cloned(),
                };

                match protocol {
                    ListenerProtocol::Tcp => self
                        .lifecycle
                        .attach(name, async move { server.serve_tcp(listener).await }),
                    ListenerProtocol::Tls => self
                        .lifecycle
                        .attach(name, async move { server.serve_tls(listener).await }),
                    ListenerProtocol::Http => self
                        .lifecycle
                        .attach(name, async move { server.serve_http(listener).await }),
                    _ => self
                        .lifecycle
                        .attach(name, async move { server.serve_https(listener).await }),
                }
                bound
            }
        };

        Ok(bound)
    }
}

/// Two Unix-domain listeners of one server config may not share a path.
fn check_socket_paths(listeners: &[ListenerConfig]) -> Result<(), StartupError> {
    let mut seen = HashSet::new();
    for listener in listeners.iter().filter(|l| l.uses_unix_socket()) {
        let path = listener.unix_socket_path();
        if !seen.insert(path.clone()) {
            return Err(StartupError::DuplicateSocketPath(path));
        }
    }
    Ok(())
}

fn load_tls(cfg: &ListenerConfig, alpn: &[&[u8]]) -> Result<Arc<rustls::ServerConfig>, StartupError> {
    match (&cfg.cert, &cfg.key) {
        (Some(cert), Some(key)) => Ok(tls::load_server_config(cert, key, alpn)?),
        _ => Err(ConfigError::MissingTlsMaterial {
            addr: cfg.addr.clone(),
            protocol: cfg.protocol.clone(),
        }
        .into()),
    }
}

/// Resolve a bind address. `:53` binds every IPv4 interface.
fn resolve_bind_addr(addr: &str) -> Result<SocketAddr, StartupError> {
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };

    normalized
        .to_socket_addrs()
        .map_err(|source| StartupError::Bind {
            addr: addr.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| StartupError::Bind {
            addr: addr.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"),
        })
}

fn new_socket(addr: SocketAddr, ty: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))?;
    if addr.is_ipv6() {
        // `[::]` also accepts IPv4 traffic.
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn bind_udp(addr: &str) -> Result<UdpSocket, StartupError> {
    let sock_addr = resolve_bind_addr(addr)?;
    let bind_err = |source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = new_socket(sock_addr, Type::DGRAM, Protocol::UDP).map_err(bind_err)?;
    socket.bind(&sock_addr.into()).map_err(bind_err)?;
    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

fn bind_tcp(addr: &str) -> Result<TcpListener, StartupError> {
    let sock_addr = resolve_bind_addr(addr)?;
    let bind_err = |source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = new_socket(sock_addr, Type::STREAM, Protocol::TCP).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&sock_addr.into()).map_err(bind_err)?;
    socket.listen(TCP_BACKLOG).map_err(bind_err)?;
    TcpListener::from_std(socket.into()).map_err(bind_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_port_only_addr() {
        assert_eq!(
            resolve_bind_addr(":5353").unwrap(),
            "0.0.0.0:5353".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_resolve_invalid_addr() {
        assert!(matches!(
            resolve_bind_addr("not an address"),
            Err(StartupError::Bind { .. })
        ));
    }

    #[test]
    fn test_duplicate_socket_paths_rejected() {
        let mut a = ListenerConfig::new("tcp", "");
        a.unix = true;
        let b = ListenerConfig::new("http", "");

        let err = check_socket_paths(&[a.clone(), b]).unwrap_err();
        assert!(matches!(err, StartupError::DuplicateSocketPath(_)));

        let mut c = ListenerConfig::new("http", "");
        c.socket_path = Some(PathBuf::from("/tmp/other.sock"));
        assert!(check_socket_paths(&[a, c]).is_ok());
    }

    #[test]
    fn test_tcp_listeners_do_not_use_socket_paths() {
        let listeners = vec![
            ListenerConfig::new("tcp", "127.0.0.1:53"),
            ListenerConfig::new("tcp", "127.0.0.1:54"),
        ];
        assert!(check_socket_paths(&listeners).is_ok());
    }
}
