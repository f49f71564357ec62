//! Packet-info control messages for wildcard-bound UDP sockets (Linux).
//!
//! Receiving: `IP_PKTINFO` / `IPV6_RECVPKTINFO` make the kernel attach the
//! destination address and inbound interface of every datagram. Sending: the
//! same information is passed back as an `IP_PKTINFO` / `IPV6_PKTINFO`
//! control message so the reply leaves from the address the client queried.

use super::udp::Datagram;
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;
use tokio::io::Interest;
use tokio::net::UdpSocket;

/// Room for one `in6_pktinfo` plus one `in_pktinfo` control message.
const CONTROL_BUF_LEN: usize = 128;

#[repr(C, align(8))]
struct ControlBuf([u8; CONTROL_BUF_LEN]);

impl ControlBuf {
    fn new() -> Self {
        Self([0; CONTROL_BUF_LEN])
    }
}

pub struct CmsgSocket {
    socket: UdpSocket,
    ipv6: bool,
}

impl CmsgSocket {
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        let ipv6 = socket.local_addr()?.is_ipv6();
        let fd = socket.as_raw_fd();

        if ipv6 {
            set_int_opt(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1)?;
            // Dual-stack sockets also see IPv4 traffic.
            let _ = set_int_opt(fd, libc::IPPROTO_IP, libc::IP_PKTINFO, 1);
        } else {
            set_int_opt(fd, libc::IPPROTO_IP, libc::IP_PKTINFO, 1)?;
        }

        Ok(Self { socket, ipv6 })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<Datagram> {
        let fd = self.socket.as_raw_fd();
        self.socket
            .async_io(Interest::READABLE, || recv_msg(fd, buf))
            .await
    }

    pub async fn send(
        &self,
        buf: &[u8],
        local_ip: Option<IpAddr>,
        if_index: u32,
        remote: SocketAddr,
    ) -> io::Result<usize> {
        let fd = self.socket.as_raw_fd();
        let ipv6 = self.ipv6;
        self.socket
            .async_io(Interest::WRITABLE, || {
                send_msg(fd, buf, local_ip, if_index, remote, ipv6)
            })
            .await
    }
}

fn set_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    // SAFETY: `value` outlives the call and its size is passed alongside.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            ptr::addr_of!(value).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn recv_msg(fd: RawFd, buf: &mut [u8]) -> io::Result<Datagram> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // SAFETY: all-zero is a valid bit pattern for these C structs.
    let mut addr: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut control = ControlBuf::new();
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };

    msg.msg_name = ptr::addr_of_mut!(addr).cast();
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.0.as_mut_ptr().cast();
    msg.msg_controllen = CONTROL_BUF_LEN as _;

    // SAFETY: every pointer in `msg` refers to a live local buffer of the
    // advertised length.
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let (local_ip, if_index) = if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        (None, 0)
    } else {
        parse_pktinfo(&msg)
    };

    Ok(Datagram {
        len: n as usize,
        local_ip,
        if_index,
        remote: sockaddr_to_std(&addr),
    })
}

fn parse_pktinfo(msg: &libc::msghdr) -> (Option<IpAddr>, u32) {
    // SAFETY: `msg` was filled by recvmsg; the CMSG_* macros stay within
    // `msg_controllen`.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            match (hdr.cmsg_level, hdr.cmsg_type) {
                (libc::IPPROTO_IP, libc::IP_PKTINFO) => {
                    let info: libc::in_pktinfo = ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast());
                    let ip = Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr));
                    return (Some(IpAddr::V4(ip)), info.ipi_ifindex as u32);
                }
                (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                    let info: libc::in6_pktinfo = ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast());
                    let ip = Ipv6Addr::from(info.ipi6_addr.s6_addr);
                    return (Some(IpAddr::V6(ip)), info.ipi6_ifindex);
                }
                _ => {}
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
    }
    (None, 0)
}

fn sockaddr_to_std(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            // SAFETY: the family tag says the storage holds a sockaddr_in.
            let addr = unsafe { &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>() };
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
                u16::from_be(addr.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // SAFETY: the family tag says the storage holds a sockaddr_in6.
            let addr = unsafe { &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in6>() };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

/// Encode `addr` for a socket of the given family. IPv4 peers of an IPv6
/// socket are written as v4-mapped addresses.
fn std_to_sockaddr(addr: SocketAddr, ipv6: bool) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: all-zero is a valid sockaddr_storage.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

    let addr = match addr {
        SocketAddr::V4(v4) if ipv6 => {
            SocketAddr::V6(SocketAddrV6::new(v4.ip().to_ipv6_mapped(), v4.port(), 0, 0))
        }
        other => other,
    };

    match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from(*v4.ip()).to_be(),
                },
                sin_zero: [0; 8],
            };
            // SAFETY: sockaddr_storage is large and aligned enough for any
            // sockaddr type.
            unsafe { ptr::write((&mut storage as *mut libc::sockaddr_storage).cast(), sin) };
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            // SAFETY: as above.
            unsafe { ptr::write((&mut storage as *mut libc::sockaddr_storage).cast(), sin6) };
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

fn send_msg(
    fd: RawFd,
    buf: &[u8],
    local_ip: Option<IpAddr>,
    if_index: u32,
    remote: SocketAddr,
    ipv6: bool,
) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let (mut name, name_len) = std_to_sockaddr(remote, ipv6);
    let mut control = ControlBuf::new();
    // SAFETY: all-zero is a valid msghdr.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };

    msg.msg_name = ptr::addr_of_mut!(name).cast();
    msg.msg_namelen = name_len;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(ip) = local_ip {
        write_pktinfo(&mut msg, &mut control, ip, if_index, ipv6);
    }

    // SAFETY: every pointer in `msg` refers to a live local buffer of the
    // advertised length.
    let n = unsafe { libc::sendmsg(fd, &msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn write_pktinfo(msg: &mut libc::msghdr, control: &mut ControlBuf, ip: IpAddr, if_index: u32, ipv6: bool) {
    if ipv6 {
        let ip6 = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        let info = libc::in6_pktinfo {
            ipi6_addr: libc::in6_addr { s6_addr: ip6.octets() },
            ipi6_ifindex: if_index,
        };
        push_cmsg(msg, control, libc::IPPROTO_IPV6, libc::IPV6_PKTINFO, info);
    } else if let IpAddr::V4(v4) = ip {
        let info = libc::in_pktinfo {
            ipi_ifindex: if_index as libc::c_int,
            ipi_spec_dst: libc::in_addr {
                s_addr: u32::from(v4).to_be(),
            },
            ipi_addr: libc::in_addr { s_addr: 0 },
        };
        push_cmsg(msg, control, libc::IPPROTO_IP, libc::IP_PKTINFO, info);
    }
}

fn push_cmsg<T>(msg: &mut libc::msghdr, control: &mut ControlBuf, level: libc::c_int, kind: libc::c_int, data: T) {
    let data_len = mem::size_of::<T>() as libc::c_uint;

    // SAFETY: the control buffer is aligned for cmsghdr and CMSG_SPACE of
    // either pktinfo struct fits in CONTROL_BUF_LEN.
    unsafe {
        msg.msg_control = control.0.as_mut_ptr().cast();
        msg.msg_controllen = libc::CMSG_SPACE(data_len) as _;

        let cmsg = libc::CMSG_FIRSTHDR(msg);
        if cmsg.is_null() {
            msg.msg_control = ptr::null_mut();
            msg.msg_controllen = 0;
            return;
        }
        (*cmsg).cmsg_level = level;
        (*cmsg).cmsg_type = kind;
        (*cmsg).cmsg_len = libc::CMSG_LEN(data_len) as _;
        ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<T>(), data);
    }
}
