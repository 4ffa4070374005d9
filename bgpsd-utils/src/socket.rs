//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

use serde::{Deserialize, Serialize};
// Re-export the socket types used throughout the workspace.
pub use {
    socket2::Socket,
    tokio::net::{
        TcpListener, TcpSocket, TcpStream, UnixStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

// Maximum TTL/hop-limit value, used by the GTSM procedure (RFC 5082).
pub const TTL_MAX: u8 = 255;

// Smallest socket buffer size the send/receive buffer tuning will fall to.
const BUFSIZE_MIN: c_int = 8192;
const BUFSIZE_MAX: c_int = 65535;

// FFI struct used to set the TCP_MD5SIG socket option.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct tcp_md5sig {
    pub tcpm_addr: nix::sys::socket::SockaddrStorage,
    pub tcpm_flags: u8,
    pub tcpm_prefixlen: u8,
    pub tcpm_keylen: u16,
    pub __tcpm_pad: u32,
    pub tcpm_key: [u8; 108],
}

// Addresses and ports of an established TCP connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// Useful type definition.
type Result<T> = std::io::Result<T>;

// Extension methods for TcpSocket.
pub trait TcpSocketExt {
    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()>;

    // Sets the value of the IP_MINTTL option for this socket.
    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()>;

    // Sets the value of the IP_TOS option for this socket.
    fn set_ipv4_tos(&self, tos: u8) -> Result<()>;

    // Sets the value of the IPV6_UNICAST_HOPS option for this socket.
    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()>;

    // Sets the value of the IPV6_MINHOPCOUNT option for this socket.
    fn set_ipv6_min_hopcount(&self, hops: u8) -> Result<()>;

    // Sets the value of the IPV6_TCLASS option for this socket.
    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()>;

    // Sets the value of the TCP_MD5SIG option for this socket.
    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()>;

    // Shrinks the send and receive buffers, halving from 64 KiB down to a
    // floor of 8 KiB when the kernel rejects a size.
    fn set_buffer_sizes(&self);
}

// Extension methods for TcpStream.
pub trait TcpStreamExt {
    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()>;

    // Sets the value of the IP_MINTTL option for this socket.
    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()>;

    // Sets the value of the IP_TOS option for this socket.
    fn set_ipv4_tos(&self, tos: u8) -> Result<()>;

    // Sets the value of the IPV6_UNICAST_HOPS option for this socket.
    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()>;

    // Sets the value of the IPV6_MINHOPCOUNT option for this socket.
    fn set_ipv6_min_hopcount(&self, hops: u8) -> Result<()>;

    // Sets the value of the IPV6_TCLASS option for this socket.
    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()>;

    // Shrinks the send and receive buffers, halving from 64 KiB down to a
    // floor of 8 KiB when the kernel rejects a size.
    fn set_buffer_sizes(&self);

    // Obtains the addresses and ports of both connection endpoints.
    fn conn_info(&self) -> Result<TcpConnInfo>;
}

// Extension methods for TcpListener.
pub trait TcpListenerExt {
    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()>;

    // Sets the value of the IPV6_UNICAST_HOPS option for this socket.
    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()>;

    // Sets the value of the TCP_MD5SIG option for this socket.
    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()>;
}

// ===== impl TcpSocket =====

impl TcpSocketExt for TcpSocket {
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        setsockopt_int(self, libc::IPPROTO_IP, libc::IP_TTL, ttl as c_int)
    }

    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()> {
        setsockopt_int(self, libc::IPPROTO_IP, libc::IP_MINTTL, ttl as c_int)
    }

    fn set_ipv4_tos(&self, tos: u8) -> Result<()> {
        setsockopt_int(self, libc::IPPROTO_IP, libc::IP_TOS, tos as c_int)
    }

    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()> {
        setsockopt_int(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            hops as c_int,
        )
    }

    fn set_ipv6_min_hopcount(&self, hops: u8) -> Result<()> {
        setsockopt_int(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_MINHOPCOUNT,
            hops as c_int,
        )
    }

    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()> {
        setsockopt_int(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_TCLASS,
            dscp as c_int,
        )
    }

    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()> {
        set_md5sig(self, dst, password)
    }

    fn set_buffer_sizes(&self) {
        set_buffer_sizes(self);
    }
}

// ===== impl TcpStream =====

impl TcpStreamExt for TcpStream {
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        setsockopt_int(self, libc::IPPROTO_IP, libc::IP_TTL, ttl as c_int)
    }

    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()> {
        setsockopt_int(self, libc::IPPROTO_IP, libc::IP_MINTTL, ttl as c_int)
    }

    fn set_ipv4_tos(&self, tos: u8) -> Result<()> {
        setsockopt_int(self, libc::IPPROTO_IP, libc::IP_TOS, tos as c_int)
    }

    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()> {
        setsockopt_int(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            hops as c_int,
        )
    }

    fn set_ipv6_min_hopcount(&self, hops: u8) -> Result<()> {
        setsockopt_int(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_MINHOPCOUNT,
            hops as c_int,
        )
    }

    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()> {
        setsockopt_int(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_TCLASS,
            dscp as c_int,
        )
    }

    fn set_buffer_sizes(&self) {
        set_buffer_sizes(self);
    }

    fn conn_info(&self) -> Result<TcpConnInfo> {
        let local = self.local_addr()?;
        let remote = self.peer_addr()?;
        Ok(TcpConnInfo {
            local_addr: local.ip(),
            local_port: local.port(),
            remote_addr: remote.ip(),
            remote_port: remote.port(),
        })
    }
}

// ===== impl TcpListener =====

impl TcpListenerExt for TcpListener {
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        setsockopt_int(self, libc::IPPROTO_IP, libc::IP_TTL, ttl as c_int)
    }

    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()> {
        setsockopt_int(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            hops as c_int,
        )
    }

    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()> {
        set_md5sig(self, dst, password)
    }
}

// ===== helper functions =====

fn set_md5sig<F: AsRawFd>(
    sock: &F,
    dst: &IpAddr,
    password: Option<&str>,
) -> Result<()> {
    let dst = SocketAddr::from((*dst, 0));
    let mut optval = tcp_md5sig {
        tcpm_addr: dst.into(),
        tcpm_flags: 0,
        tcpm_prefixlen: 0,
        tcpm_keylen: 0,
        __tcpm_pad: 0,
        tcpm_key: [0; 108],
    };
    if let Some(password) = password {
        optval.tcpm_keylen = password.len() as u16;
        optval.tcpm_key[..password.len()].copy_from_slice(password.as_bytes());
    }

    setsockopt(
        sock,
        libc::IPPROTO_TCP,
        libc::TCP_MD5SIG,
        &optval as *const _ as *const c_void,
        std::mem::size_of::<tcp_md5sig>() as libc::socklen_t,
    )
}

fn set_buffer_sizes<F: AsRawFd>(sock: &F) {
    for opt in [libc::SO_RCVBUF, libc::SO_SNDBUF] {
        let mut bsize = BUFSIZE_MAX;
        while bsize > BUFSIZE_MIN {
            match setsockopt_int(sock, libc::SOL_SOCKET, opt, bsize) {
                Ok(_) => break,
                Err(error)
                    if error.raw_os_error() == Some(libc::EINVAL) =>
                {
                    break;
                }
                Err(_) => bsize /= 2,
            }
        }
    }
}

fn setsockopt_int<F: AsRawFd>(
    sock: &F,
    opt: c_int,
    val: c_int,
    optval: c_int,
) -> Result<()> {
    setsockopt(
        sock,
        opt,
        val,
        &optval as *const _ as *const c_void,
        std::mem::size_of::<c_int>() as libc::socklen_t,
    )
}

fn setsockopt<F: AsRawFd>(
    sock: &F,
    opt: c_int,
    val: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret;

    unsafe {
        ret = libc::setsockopt(sock.as_raw_fd(), opt, val, optval, optlen);
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}
