use super::proxy_protocol::{self, ProxyError};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

/// Time allowed for a proxied client to send its PROXY header.
pub const PROXY_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

enum Inner {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

/// A TCP or Unix-domain listener, optionally expecting a PROXY header on
/// every accepted connection.
pub struct StreamListener {
    inner: Inner,
    proxy_protocol: bool,
}

impl StreamListener {
    pub fn tcp(listener: TcpListener) -> Self {
        Self {
            inner: Inner::Tcp(listener),
            proxy_protocol: false,
        }
    }

    pub fn unix(listener: UnixListener, path: PathBuf) -> Self {
        Self {
            inner: Inner::Unix(listener, path),
            proxy_protocol: false,
        }
    }

    /// Require a PROXY header on every connection. Connections without one
    /// are dropped.
    pub fn with_proxy_protocol(mut self, required: bool) -> Self {
        self.proxy_protocol = required;
        self
    }

    pub fn proxy_protocol(&self) -> bool {
        self.proxy_protocol
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            Inner::Tcp(listener) => listener.local_addr().ok(),
            Inner::Unix(..) => None,
        }
    }

    pub fn socket_path(&self) -> Option<&PathBuf> {
        match &self.inner {
            Inner::Tcp(_) => None,
            Inner::Unix(_, path) => Some(path),
        }
    }

    /// Accept one connection. Unix peers carry no address.
    pub async fn accept(&self) -> io::Result<(Conn, Option<SocketAddr>)> {
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok((Conn::Tcp(stream), Some(peer)))
            }
            Inner::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                Ok((Conn::Unix(stream), None))
            }
        }
    }
}

/// Resolve the client address of a freshly accepted connection, consuming
/// the PROXY header first when `proxy_protocol` is set.
pub async fn client_addr(
    conn: &mut Conn,
    peer: Option<SocketAddr>,
    proxy_protocol: bool,
) -> Result<Option<IpAddr>, ProxyError> {
    let peer_ip = peer.map(|p| p.ip().to_canonical());
    if !proxy_protocol {
        return Ok(peer_ip);
    }

    let header = tokio::time::timeout(PROXY_HEADER_TIMEOUT, proxy_protocol::read_header(conn))
        .await
        .map_err(|_| ProxyError::Io(io::ErrorKind::TimedOut.into()))??;

    Ok(header.source.map(|s| s.ip().to_canonical()).or(peer_ip))
}

/// An accepted stream connection.
pub enum Conn {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Conn::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Conn::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_flush(cx),
            Conn::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Conn::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
