use super::listener::{client_addr, Conn, StreamListener};
use super::{Server, ServerError};
use crate::pool::{self, PooledBuf};
use ferrous_gate_application::ports::DnsHandler;
use ferrous_gate_domain::RequestMeta;
use hickory_proto::op::Message;
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

impl Server {
    /// Serve length-prefixed DNS over TCP or a Unix socket.
    pub async fn serve_tcp(&self, listener: StreamListener) -> Result<(), ServerError> {
        let handler = self.dns_handler()?;
        let idle_timeout = self.idle_timeout();

        self.accept_loop(listener, move |conn, client| {
            serve_dns_stream(conn, client, Arc::clone(&handler), idle_timeout)
        })
        .await
    }

    /// Serve DNS over TLS.
    pub async fn serve_tls(&self, listener: StreamListener) -> Result<(), ServerError> {
        let handler = self.dns_handler()?;
        let acceptor = TlsAcceptor::from(self.tls_config()?);
        let idle_timeout = self.idle_timeout();

        self.accept_loop(listener, move |conn, client| {
            let handler = Arc::clone(&handler);
            let acceptor = acceptor.clone();
            async move {
                match tokio::time::timeout(idle_timeout, acceptor.accept(conn)).await {
                    Ok(Ok(stream)) => serve_dns_stream(stream, client, handler, idle_timeout).await,
                    Ok(Err(e)) => debug!(error = %e, client = ?client, "TLS handshake failed"),
                    Err(_) => debug!(client = ?client, "TLS handshake timed out"),
                }
            }
        })
        .await
    }

    /// Accept connections until the server closes, running `on_conn` for each
    /// on its own task once the client address is known.
    pub(crate) async fn accept_loop<F, Fut>(
        &self,
        listener: StreamListener,
        on_conn: F,
    ) -> Result<(), ServerError>
    where
        F: Fn(Conn, Option<IpAddr>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(_tracked) = self.track() else {
            return Err(ServerError::ServerClosed);
        };

        let connections = self.shutdown_token().child_token();
        let _connections_guard = connections.clone().drop_guard();
        let on_conn = Arc::new(on_conn);
        let proxy_protocol = listener.proxy_protocol();

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown_token().cancelled() => return Err(ServerError::ServerClosed),
                accepted = listener.accept() => accepted,
            };

            let (mut conn, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    if self.closed() {
                        return Err(ServerError::ServerClosed);
                    }
                    if is_transient_accept_error(&e) {
                        debug!(error = %e, "Transient accept error");
                        continue;
                    }
                    return Err(ServerError::UnexpectedAccept(e));
                }
            };

            let on_conn = Arc::clone(&on_conn);
            let cancel = connections.clone();
            let tracked = self.track_connection();

            tokio::spawn(async move {
                let _tracked = tracked;
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = async {
                        match client_addr(&mut conn, peer, proxy_protocol).await {
                            Ok(client) => on_conn(conn, client).await,
                            Err(e) => debug!(error = %e, peer = ?peer, "Dropping connection without valid PROXY header"),
                        }
                    } => {}
                }
            });
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
    )
}

/// Read length-prefixed queries from `stream` until EOF, an idle timeout or
/// a malformed frame. Queries are answered concurrently; replies share the
/// write half through a lock.
pub(crate) async fn serve_dns_stream<S>(
    stream: S,
    client: Option<IpAddr>,
    handler: Arc<dyn DnsHandler>,
    idle_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let writer = Arc::new(Mutex::new(writer));
    let meta = RequestMeta::new(client);
    let mut in_flight = JoinSet::new();

    loop {
        let frame = match tokio::time::timeout(idle_timeout, read_frame(&mut reader)).await {
            Err(_) => {
                debug!(client = ?client, "Connection idle timeout");
                break;
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                debug!(error = %e, client = ?client, "Failed to read from connection");
                break;
            }
        };

        let query = match Message::from_vec(&frame) {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, client = ?client, "Invalid msg");
                break;
            }
        };

        while in_flight.try_join_next().is_some() {}

        let handler = Arc::clone(&handler);
        let writer = Arc::clone(&writer);
        let meta = meta.clone();
        in_flight.spawn(async move {
            answer_stream_query(&*handler, query, &meta, &writer).await;
        });
    }

    // The peer may half-close after its last query; answer what is pending.
    while in_flight.join_next().await.is_some() {}
}

async fn read_frame<R>(reader: &mut R) -> io::Result<Option<PooledBuf>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 2];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut frame = pool::get_buf(usize::from(u16::from_be_bytes(len)));
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

async fn answer_stream_query<W>(
    handler: &dyn DnsHandler,
    query: Message,
    meta: &RequestMeta,
    writer: &Mutex<WriteHalf<W>>,
) where
    W: AsyncWrite,
{
    let response = match handler.serve_dns(&query, meta).await {
        Ok(Some(response)) => response,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, client = ?meta.client_addr, "Handler err");
            return;
        }
    };

    let packed = match pool::pack_tcp_buffer(&response) {
        Ok(packed) => packed,
        Err(e) => {
            warn!(error = %e, "Failed to pack handler's response");
            return;
        }
    };

    let mut writer = writer.lock().await;
    let written = match writer.write_all(&packed).await {
        Ok(()) => writer.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        warn!(error = %e, client = ?meta.client_addr, "Failed to write response");
    }
}
