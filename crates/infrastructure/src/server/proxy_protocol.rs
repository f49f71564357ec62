//! HAProxy PROXY protocol (v1 text and v2 binary) header parsing.
//!
//! The header is read with exact-length reads so no byte of the proxied
//! stream is consumed; the caller keeps using the same stream afterwards.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const V2_SIGNATURE: [u8; 12] = *b"\r\n\r\n\0\r\nQUIT\n";
const V1_PREFIX: &[u8] = b"PROXY ";
/// Longest possible v1 line, CRLF included.
const V1_MAX_LEN: usize = 107;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("failed to read proxy header: {0}")]
    Io(#[from] io::Error),

    #[error("connection did not start with a proxy protocol header")]
    MissingHeader,

    #[error("invalid proxy protocol header: {0}")]
    Invalid(&'static str),
}

/// Addresses conveyed by a PROXY header. Both are `None` for `LOCAL`
/// commands and `UNKNOWN`/`UNSPEC` families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProxyHeader {
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
}

/// Read a PROXY header from the start of `stream`.
pub async fn read_header<R>(stream: &mut R) -> Result<ProxyHeader, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 12];
    stream.read_exact(&mut prefix).await?;

    if prefix == V2_SIGNATURE {
        return read_v2(stream).await;
    }
    if prefix.starts_with(V1_PREFIX) {
        return read_v1(stream, prefix).await;
    }
    Err(ProxyError::MissingHeader)
}

async fn read_v1<R>(stream: &mut R, prefix: [u8; 12]) -> Result<ProxyHeader, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(V1_MAX_LEN);
    line.extend_from_slice(&prefix);

    while !line.ends_with(b"\r\n") {
        if line.len() >= V1_MAX_LEN {
            return Err(ProxyError::Invalid("v1 header too long"));
        }
        line.push(stream.read_u8().await?);
    }

    let text = std::str::from_utf8(&line[..line.len() - 2])
        .map_err(|_| ProxyError::Invalid("v1 header is not ascii"))?;
    parse_v1(text)
}

fn parse_v1(line: &str) -> Result<ProxyHeader, ProxyError> {
    let mut fields = line.split(' ');
    if fields.next() != Some("PROXY") {
        return Err(ProxyError::Invalid("v1 header must start with PROXY"));
    }

    match fields.next() {
        Some("UNKNOWN") => Ok(ProxyHeader::default()),
        Some("TCP4") | Some("TCP6") => {
            let src_ip = parse_field::<IpAddr>(fields.next())?;
            let dst_ip = parse_field::<IpAddr>(fields.next())?;
            let src_port = parse_field::<u16>(fields.next())?;
            let dst_port = parse_field::<u16>(fields.next())?;
            if fields.next().is_some() {
                return Err(ProxyError::Invalid("v1 header has trailing fields"));
            }
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(src_ip, src_port)),
                destination: Some(SocketAddr::new(dst_ip, dst_port)),
            })
        }
        _ => Err(ProxyError::Invalid("v1 header has unknown protocol")),
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>) -> Result<T, ProxyError> {
    field
        .and_then(|f| f.parse().ok())
        .ok_or(ProxyError::Invalid("v1 header has a malformed address"))
}

async fn read_v2<R>(stream: &mut R) -> Result<ProxyHeader, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;

    let version = head[0] >> 4;
    let command = head[0] & 0x0F;
    let family = head[1] >> 4;
    let len = usize::from(u16::from_be_bytes([head[2], head[3]]));

    if version != 2 {
        return Err(ProxyError::Invalid("unsupported v2 version"));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;

    match command {
        // LOCAL: health checks from the proxy itself.
        0x0 => Ok(ProxyHeader::default()),
        0x1 => parse_v2_addresses(family, &body),
        _ => Err(ProxyError::Invalid("unsupported v2 command")),
    }
}

fn parse_v2_addresses(family: u8, body: &[u8]) -> Result<ProxyHeader, ProxyError> {
    match family {
        // AF_INET
        0x1 => {
            if body.len() < 12 {
                return Err(ProxyError::Invalid("short v2 inet address block"));
            }
            let src = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            let dst = Ipv4Addr::new(body[4], body[5], body[6], body[7]);
            let src_port = u16::from_be_bytes([body[8], body[9]]);
            let dst_port = u16::from_be_bytes([body[10], body[11]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(src.into(), src_port)),
                destination: Some(SocketAddr::new(dst.into(), dst_port)),
            })
        }
        // AF_INET6
        0x2 => {
            if body.len() < 36 {
                return Err(ProxyError::Invalid("short v2 inet6 address block"));
            }
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&body[0..16]);
            dst.copy_from_slice(&body[16..32]);
            let src_port = u16::from_be_bytes([body[32], body[33]]);
            let dst_port = u16::from_be_bytes([body[34], body[35]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(Ipv6Addr::from(src).into(), src_port)),
                destination: Some(SocketAddr::new(Ipv6Addr::from(dst).into(), dst_port)),
            })
        }
        // AF_UNSPEC, AF_UNIX
        _ => Ok(ProxyHeader::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v2_header(command: u8, family: u8, body: &[u8]) -> Vec<u8> {
        let mut out = V2_SIGNATURE.to_vec();
        out.push(0x20 | command);
        out.push(family << 4 | 0x1);
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn test_v1_tcp4() {
        let mut input: &[u8] = b"PROXY TCP4 203.0.113.9 10.0.0.1 5555 53\r\nrest";
        let header = read_header(&mut input).await.unwrap();

        assert_eq!(header.source, Some("203.0.113.9:5555".parse().unwrap()));
        assert_eq!(header.destination, Some("10.0.0.1:53".parse().unwrap()));
        assert_eq!(input, b"rest");
    }

    #[tokio::test]
    async fn test_v1_tcp6() {
        let mut input: &[u8] = b"PROXY TCP6 2001:db8::1 2001:db8::2 40000 853\r\n";
        let header = read_header(&mut input).await.unwrap();

        assert_eq!(header.source, Some("[2001:db8::1]:40000".parse().unwrap()));
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_v1_unknown_has_no_addresses() {
        let mut input: &[u8] = b"PROXY UNKNOWN\r\n";
        let header = read_header(&mut input).await.unwrap();
        assert_eq!(header, ProxyHeader::default());
    }

    #[tokio::test]
    async fn test_v1_rejects_garbage_address() {
        let mut input: &[u8] = b"PROXY TCP4 not-an-ip 10.0.0.1 1 2\r\n";
        assert!(matches!(
            read_header(&mut input).await,
            Err(ProxyError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_v1_rejects_unterminated_line() {
        let mut long = b"PROXY TCP4 ".to_vec();
        long.extend(std::iter::repeat(b'1').take(200));
        let mut input: &[u8] = &long;
        assert!(read_header(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_v2_inet() {
        let body = [
            198, 51, 100, 4, // src
            10, 0, 0, 1, // dst
            0x1F, 0x90, // 8080
            0x00, 0x35, // 53
        ];
        let mut bytes = v2_header(0x1, 0x1, &body);
        bytes.extend_from_slice(b"\x00\x1d");
        let mut input: &[u8] = &bytes;

        let header = read_header(&mut input).await.unwrap();
        assert_eq!(header.source, Some("198.51.100.4:8080".parse().unwrap()));
        assert_eq!(header.destination, Some("10.0.0.1:53".parse().unwrap()));
        assert_eq!(input, b"\x00\x1d");
    }

    #[tokio::test]
    async fn test_v2_local_keeps_peer() {
        let bytes = v2_header(0x0, 0x0, &[]);
        let mut input: &[u8] = &bytes;
        let header = read_header(&mut input).await.unwrap();
        assert_eq!(header.source, None);
    }

    #[tokio::test]
    async fn test_v2_skips_tlvs() {
        let mut body = vec![192, 0, 2, 1, 192, 0, 2, 2, 0, 1, 0, 2];
        body.extend_from_slice(&[0x04, 0x00, 0x02, 0xAA, 0xBB]);
        let bytes = v2_header(0x1, 0x1, &body);
        let mut input: &[u8] = &bytes;

        let header = read_header(&mut input).await.unwrap();
        assert_eq!(header.source, Some("192.0.2.1:1".parse().unwrap()));
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_missing_header() {
        let mut input: &[u8] = b"\x00\x1d\x12\x34\x01\x00\x00\x01\x00\x00\x00\x00";
        assert!(matches!(
            read_header(&mut input).await,
            Err(ProxyError::MissingHeader)
        ));
    }

    #[tokio::test]
    async fn test_short_stream_is_io_error() {
        let mut input: &[u8] = b"PROXY";
        assert!(matches!(read_header(&mut input).await, Err(ProxyError::Io(_))));
    }
}
