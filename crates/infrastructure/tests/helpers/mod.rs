#![allow(dead_code)]

use async_trait::async_trait;
use ferrous_gate_application::message::reply_to;
use ferrous_gate_application::ports::{DnsHandler, QueryPipeline};
use ferrous_gate_domain::{DomainError, RequestMeta};
use ferrous_gate_infrastructure::server::{Datagram, PacketConn};
use hickory_proto::op::{Edns, Message, Query};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

// ============================================================================
// Messages
// ============================================================================

pub fn query(name: &str) -> Message {
    static NEXT_ID: AtomicU16 = AtomicU16::new(1);
    let mut message = Message::new();
    message
        .set_id(NEXT_ID.fetch_add(1, Ordering::Relaxed))
        .set_recursion_desired(true)
        .add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
    message
}

pub fn query_with_edns(name: &str, payload: u16) -> Message {
    let mut message = query(name);
    let mut edns = Edns::new();
    edns.set_max_payload(payload);
    message.set_edns(edns);
    message
}

pub fn first_a(message: &Message) -> Ipv4Addr {
    match message.answers().first().map(|r| r.data()) {
        Some(RData::A(A(ip))) => *ip,
        other => panic!("expected an A answer, got {other:?}"),
    }
}

fn a_reply(query: &Message, ips: impl IntoIterator<Item = Ipv4Addr>) -> Message {
    let mut response = reply_to(query);
    let name = query.queries()[0].name().clone();
    for ip in ips {
        response.add_answer(Record::from_rdata(name.clone(), 300, RData::A(A(ip))));
    }
    response
}

// ============================================================================
// Handlers and pipelines
// ============================================================================

/// Answers with an A record holding the client address (0.0.0.0 if unknown).
pub struct EchoClient;

fn client_v4(meta: &RequestMeta) -> Ipv4Addr {
    match meta.client_addr {
        Some(IpAddr::V4(ip)) => ip,
        _ => Ipv4Addr::UNSPECIFIED,
    }
}

#[async_trait]
impl DnsHandler for EchoClient {
    async fn serve_dns(
        &self,
        query: &Message,
        meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        Ok(Some(a_reply(query, [client_v4(meta)])))
    }
}

#[async_trait]
impl QueryPipeline for EchoClient {
    async fn exec(
        &self,
        query: &Message,
        meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        Ok(Some(a_reply(query, [client_v4(meta)])))
    }
}

/// Answers with `count` distinct A records.
pub struct ManyAnswers(pub u32);

#[async_trait]
impl DnsHandler for ManyAnswers {
    async fn serve_dns(
        &self,
        query: &Message,
        _meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        Ok(Some(a_reply(
            query,
            (0..self.0).map(|i| Ipv4Addr::from(0x0a00_0000 + i)),
        )))
    }
}

/// Never answers.
pub struct Silent;

#[async_trait]
impl DnsHandler for Silent {
    async fn serve_dns(
        &self,
        _query: &Message,
        _meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        Ok(None)
    }
}

/// Always fails.
pub struct Failing;

#[async_trait]
impl DnsHandler for Failing {
    async fn serve_dns(
        &self,
        _query: &Message,
        _meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        Err(DomainError::EntryFailed("boom".into()))
    }
}

// ============================================================================
// Scripted PacketConn
// ============================================================================

pub enum ScriptedRead {
    Packet {
        bytes: Vec<u8>,
        remote: Option<SocketAddr>,
    },
    Error(io::ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub bytes: Vec<u8>,
    pub local_ip: Option<IpAddr>,
    pub if_index: u32,
    pub remote: SocketAddr,
}

/// A `PacketConn` fed from a channel; reads block until the test pushes the
/// next scripted datagram.
pub struct ScriptedConn {
    reads: tokio::sync::Mutex<mpsc::UnboundedReceiver<ScriptedRead>>,
    writes: Mutex<Vec<Written>>,
    local_ip: Option<IpAddr>,
    if_index: u32,
}

impl ScriptedConn {
    pub fn new() -> (Self, mpsc::UnboundedSender<ScriptedRead>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                reads: tokio::sync::Mutex::new(rx),
                writes: Mutex::new(Vec::new()),
                local_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 53))),
                if_index: 7,
            },
            tx,
        )
    }

    pub fn writes(&self) -> Vec<Written> {
        self.writes.lock().unwrap().clone()
    }

    /// Wait until at least `n` writes happened.
    pub async fn wait_for_writes(&self, n: usize) -> Vec<Written> {
        for _ in 0..200 {
            let writes = self.writes();
            if writes.len() >= n {
                return writes;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.writes()
    }
}

#[async_trait]
impl PacketConn for ScriptedConn {
    async fn read_from(&self, buf: &mut [u8]) -> io::Result<Datagram> {
        let next = self.reads.lock().await.recv().await;
        match next {
            Some(ScriptedRead::Packet { bytes, remote }) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(Datagram {
                    len: bytes.len(),
                    local_ip: self.local_ip,
                    if_index: self.if_index,
                    remote,
                })
            }
            Some(ScriptedRead::Error(kind)) => Err(kind.into()),
            None => std::future::pending().await,
        }
    }

    async fn write_to(
        &self,
        buf: &[u8],
        local_ip: Option<IpAddr>,
        if_index: u32,
        remote: SocketAddr,
    ) -> io::Result<usize> {
        self.writes.lock().unwrap().push(Written {
            bytes: buf.to_vec(),
            local_ip,
            if_index,
            remote,
        });
        Ok(buf.len())
    }
}

// ============================================================================
// Clients
// ============================================================================

pub async fn udp_exchange(server: SocketAddr, query: &Message) -> Message {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&query.to_vec().unwrap(), server).await.unwrap();

    let mut buf = vec![0u8; 65535];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("no udp response")
        .unwrap();
    Message::from_vec(&buf[..n]).unwrap()
}

pub async fn write_framed<S: AsyncWrite + Unpin>(stream: &mut S, query: &Message) {
    let wire = query.to_vec().unwrap();
    stream
        .write_all(&(wire.len() as u16).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&wire).await.unwrap();
    stream.flush().await.unwrap();
}

pub async fn read_framed<S: AsyncRead + Unpin>(stream: &mut S) -> Message {
    let mut len = [0u8; 2];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut len))
        .await
        .expect("no stream response")
        .unwrap();
    let mut body = vec![0u8; u16::from_be_bytes(len) as usize];
    stream.read_exact(&mut body).await.unwrap();
    Message::from_vec(&body).unwrap()
}

pub async fn stream_exchange<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    query: &Message,
) -> Message {
    write_framed(stream, query).await;
    read_framed(stream).await
}
