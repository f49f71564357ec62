use super::{Server, ServerError};
use crate::dns::message::{truncate, udp_size};
use crate::pool::{self, MAX_PACKET_SIZE};
use async_trait::async_trait;
use ferrous_gate_application::ports::DnsHandler;
use ferrous_gate_domain::RequestMeta;
use hickory_proto::op::Message;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// One datagram read from a [`PacketConn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    pub len: usize,
    /// Destination address the datagram arrived on, when known.
    pub local_ip: Option<IpAddr>,
    /// Interface the datagram arrived on, 0 when unknown.
    pub if_index: u32,
    /// `None` when the sender address could not be decoded.
    pub remote: Option<SocketAddr>,
}

/// Datagram socket that can report and honour the local reply address.
///
/// Sockets bound to a wildcard address must reply from the address the query
/// was sent to, otherwise multi-homed clients drop the answer.
#[async_trait]
pub trait PacketConn: Send + Sync + 'static {
    async fn read_from(&self, buf: &mut [u8]) -> io::Result<Datagram>;

    async fn write_to(
        &self,
        buf: &[u8],
        local_ip: Option<IpAddr>,
        if_index: u32,
        remote: SocketAddr,
    ) -> io::Result<usize>;
}

pub enum UdpConn {
    /// Wildcard bind: routes replies with IP_PKTINFO / IPV6_PKTINFO.
    #[cfg(target_os = "linux")]
    Cmsg(super::cmsg::CmsgSocket),
    /// Specific bind: the kernel already picks the right source address.
    Plain(UdpSocket),
}

impl UdpConn {
    /// Wrap `socket`, enabling packet-info control messages when it is bound
    /// to a wildcard address.
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        #[cfg(target_os = "linux")]
        if socket.local_addr()?.ip().is_unspecified() {
            return super::cmsg::CmsgSocket::new(socket).map(UdpConn::Cmsg);
        }

        Ok(UdpConn::Plain(socket))
    }

    pub fn uses_cmsg(&self) -> bool {
        !matches!(self, UdpConn::Plain(_))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            #[cfg(target_os = "linux")]
            UdpConn::Cmsg(socket) => socket.local_addr(),
            UdpConn::Plain(socket) => socket.local_addr(),
        }
    }
}

#[async_trait]
impl PacketConn for UdpConn {
    async fn read_from(&self, buf: &mut [u8]) -> io::Result<Datagram> {
        match self {
            #[cfg(target_os = "linux")]
            UdpConn::Cmsg(socket) => socket.recv(buf).await,
            UdpConn::Plain(socket) => {
                let (len, remote) = socket.recv_from(buf).await?;
                Ok(Datagram {
                    len,
                    local_ip: None,
                    if_index: 0,
                    remote: Some(remote),
                })
            }
        }
    }

    #[cfg_attr(not(target_os = "linux"), allow(unused_variables))]
    async fn write_to(
        &self,
        buf: &[u8],
        local_ip: Option<IpAddr>,
        if_index: u32,
        remote: SocketAddr,
    ) -> io::Result<usize> {
        match self {
            #[cfg(target_os = "linux")]
            UdpConn::Cmsg(socket) => socket.send(buf, local_ip, if_index, remote).await,
            // A socket bound to one address replies from it; hints are moot.
            UdpConn::Plain(socket) => socket.send_to(buf, remote).await,
        }
    }
}

impl Server {
    /// Serve DNS over UDP on `socket` until the server closes.
    pub async fn serve_udp(&self, socket: UdpSocket) -> Result<(), ServerError> {
        let handler = self.dns_handler()?;
        let conn = UdpConn::new(socket).map_err(ServerError::Cmsg)?;
        self.serve_packets(Arc::new(conn), handler).await
    }

    /// Serve DNS on any packet connection. Used by [`Server::serve_udp`].
    pub async fn serve_packets<C: PacketConn>(
        &self,
        conn: Arc<C>,
        handler: Arc<dyn DnsHandler>,
    ) -> Result<(), ServerError> {
        let Some(_tracked) = self.track() else {
            return Err(ServerError::ServerClosed);
        };

        // Cancelled when this loop exits, taking pending query tasks with it.
        let queries = self.shutdown_token().child_token();
        let _queries_guard = queries.clone().drop_guard();

        let mut read_buf = pool::get_buf(MAX_PACKET_SIZE);

        loop {
            let read = tokio::select! {
                _ = self.shutdown_token().cancelled() => return Err(ServerError::ServerClosed),
                read = conn.read_from(&mut read_buf) => read,
            };

            let datagram = match read {
                Ok(datagram) => datagram,
                Err(e) => {
                    if self.closed() {
                        return Err(ServerError::ServerClosed);
                    }
                    return Err(ServerError::UnexpectedRead(e));
                }
            };

            let packet = &read_buf[..datagram.len];

            let Some(remote) = datagram.remote else {
                warn!(bytes = datagram.len, "Failed to parse request remote addr, dropping packet");
                continue;
            };

            let query = match Message::from_vec(packet) {
                Ok(query) => query,
                Err(e) => {
                    warn!(error = %e, msg = ?packet, from = %remote, "Invalid msg");
                    continue;
                }
            };

            let meta = RequestMeta::from_ip(remote.ip().to_canonical());

            tokio::spawn(handle_packet_query(
                queries.clone(),
                Arc::clone(&conn),
                Arc::clone(&handler),
                query,
                meta,
                datagram,
                remote,
            ));
        }
    }
}

async fn handle_packet_query<C: PacketConn>(
    cancel: CancellationToken,
    conn: Arc<C>,
    handler: Arc<dyn DnsHandler>,
    query: Message,
    meta: RequestMeta,
    datagram: Datagram,
    remote: SocketAddr,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = answer_packet_query(&*conn, &*handler, query, &meta, datagram, remote) => {}
    }
}

async fn answer_packet_query<C: PacketConn>(
    conn: &C,
    handler: &dyn DnsHandler,
    query: Message,
    meta: &RequestMeta,
    datagram: Datagram,
    remote: SocketAddr,
) {
    let response = match handler.serve_dns(&query, meta).await {
        Ok(Some(response)) => response,
        Ok(None) => {
            debug!(from = %remote, id = query.id(), "Handler produced no response");
            return;
        }
        Err(e) => {
            warn!(error = %e, from = %remote, "Handler err");
            return;
        }
    };

    let mut response = response;
    if let Err(e) = truncate(&mut response, udp_size(&query)) {
        error!(error = %e, "Failed to truncate handler's response");
        return;
    }

    let packed = match pool::pack_buffer(&response) {
        Ok(packed) => packed,
        Err(e) => {
            error!(error = %e, "Failed to pack handler's response");
            return;
        }
    };

    if let Err(e) = conn
        .write_to(&packed, datagram.local_ip, datagram.if_index, remote)
        .await
    {
        warn!(error = %e, to = %remote, "Failed to write response");
    }
}
