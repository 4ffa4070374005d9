//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bgpsd_utils::Sender;
use bgpsd_utils::ip::{AddressFamily, IpAddrExt};
use bgpsd_utils::socket::{
    OwnedReadHalf, OwnedWriteHalf, TTL_MAX, TcpConnInfo, TcpListener,
    TcpListenerExt, TcpSocket, TcpSocketExt, TcpStream, TcpStreamExt,
};
use bytes::Bytes;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::{InterfaceFlags, if_nametoindex};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::error::SendError;
use tokio::time::sleep;
use tracing::warn;

use crate::config::{MSG_PROCESS_LIMIT, PeerConfig};
use crate::error::{IoError, RxError};
use crate::packet::consts::{BGP_PORT, MAX_PKTSIZE};
use crate::packet::message::Message;
use crate::tasks::messages::{PeerRxMsg, PeerTxMsg, TcpAcceptMsg, TxEvent};

const MAX_BACKLOG: i32 = 4096;

// ===== global functions =====

// Turns a pre-opened, bound socket received from the parent into a listening
// socket.
pub(crate) fn listener_from_fd(
    fd: OwnedFd,
    af: AddressFamily,
) -> Result<TcpListener, std::io::Error> {
    if unsafe { libc::listen(fd.as_raw_fd(), MAX_BACKLOG) } == -1 {
        return Err(std::io::Error::last_os_error());
    }

    let listener = std::net::TcpListener::from(fd);
    listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(listener)?;

    // GTSM procedure: set TTL to max for outgoing packets so that
    // TTL security works.
    match af {
        AddressFamily::Ipv4 => listener.set_ipv4_ttl(TTL_MAX)?,
        AddressFamily::Ipv6 => listener.set_ipv6_unicast_hops(TTL_MAX)?,
    }

    Ok(listener)
}

pub(crate) async fn listen_loop(
    listener: Arc<TcpListener>,
    tcp_acceptp: Sender<TcpAcceptMsg>,
) -> Result<(), SendError<TcpAcceptMsg>> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => match stream.conn_info() {
                Ok(conn_info) => {
                    let msg = TcpAcceptMsg { stream, conn_info };
                    tcp_acceptp.send(msg).await?;
                }
                Err(error) => {
                    IoError::TcpInfoError(error).log();
                }
            },
            Err(error)
                if matches!(
                    error.raw_os_error(),
                    Some(libc::EMFILE) | Some(libc::ENFILE)
                ) =>
            {
                // Out of descriptors: throttle the accept loop for a second
                // instead of spinning.
                IoError::TcpAcceptError(error).log();
                sleep(Duration::from_secs(1)).await;
            }
            Err(error) => {
                IoError::TcpAcceptError(error).log();
            }
        }
    }
}

// Applies the per-peer socket options to an accepted connection.
pub(crate) fn accepted_stream_init(
    stream: &TcpStream,
    conf: &PeerConfig,
) -> Result<(), std::io::Error> {
    match conf.remote_addr.address_family() {
        AddressFamily::Ipv4 => {
            // Set precedence, see RFC 1771 appendix 5.
            stream.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL)?;
            if conf.ebgp {
                let mut ttl = conf.distance;
                if conf.ttl_security {
                    stream.set_ipv4_minttl(gtsm_minttl(conf.distance))?;
                    ttl = TTL_MAX;
                }
                stream.set_ipv4_ttl(ttl)?;
            }
        }
        AddressFamily::Ipv6 => {
            if conf.ebgp {
                let mut hops = conf.distance;
                if conf.ttl_security {
                    stream.set_ipv6_min_hopcount(gtsm_minttl(conf.distance))?;
                    hops = TTL_MAX;
                }
                stream.set_ipv6_unicast_hops(hops)?;
            }
        }
    }

    stream.set_nodelay(true)?;
    stream.set_buffer_sizes();

    Ok(())
}

// Connects to the peer, applying the configured socket options first.
pub(crate) async fn connect(
    conf: &PeerConfig,
) -> Result<(TcpStream, TcpConnInfo), IoError> {
    let af = conf.remote_addr.address_family();

    // Create TCP socket.
    let socket = match af {
        AddressFamily::Ipv4 => TcpSocket::new_v4(),
        AddressFamily::Ipv6 => TcpSocket::new_v6(),
    }
    .map_err(IoError::TcpSocketError)?;

    socket_setup(&socket, conf).map_err(IoError::TcpSocketError)?;

    // Set the TCP MD5 password.
    if let Some(password) = &conf.md5_password {
        socket
            .set_md5sig(&conf.remote_addr, Some(password))
            .map_err(IoError::TcpAuthError)?;
    }

    // If a local address is configured we need to bind.
    let local_addr = match af {
        AddressFamily::Ipv4 => conf.local_addr_v4.map(IpAddr::V4),
        AddressFamily::Ipv6 => conf.local_addr_v6.map(IpAddr::V6),
    };
    if let Some(local_addr) = local_addr {
        socket.set_reuseaddr(true).map_err(IoError::TcpSocketError)?;
        socket
            .bind(SocketAddr::from((local_addr, 0)))
            .map_err(IoError::TcpSocketError)?;
    }

    // Connect to the remote address. A connection in progress resolves once
    // the socket signals writability.
    let port = if conf.remote_port != 0 {
        conf.remote_port
    } else {
        BGP_PORT
    };
    let stream = socket
        .connect(SocketAddr::from((conf.remote_addr, port)))
        .await
        .map_err(IoError::TcpConnectError)?;
    stream.set_nodelay(true).map_err(IoError::TcpSocketError)?;

    // Obtain TCP connection address/port information.
    let conn_info = stream.conn_info().map_err(IoError::TcpInfoError)?;

    Ok((stream, conn_info))
}

// Looks for an address of the opposite family assigned to the interface that
// carries the session, for the RDE to use as alternate nexthop. Also reports
// the interface index when the peer shares a subnet with us.
pub(crate) fn alternate_addr(
    local: IpAddr,
    remote: IpAddr,
) -> (Option<IpAddr>, u32) {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(error) => {
            warn!(%error, "getifaddrs");
            return (None, 0);
        }
    };

    // Find the interface owning the local address and determine whether the
    // peer is directly connected through it.
    let mut connected = false;
    let Some(ifname) = addrs.iter().find_map(|ifa| {
        let addr = ifa.address.as_ref().and_then(sockaddr_to_ip)?;
        if addr != local {
            return None;
        }
        if ifa.flags.contains(InterfaceFlags::IFF_POINTOPOINT) {
            if let Some(dst) =
                ifa.destination.as_ref().and_then(sockaddr_to_ip)
            {
                connected = dst == remote;
            }
        } else if let Some(mask) =
            ifa.netmask.as_ref().and_then(sockaddr_to_ip)
        {
            connected = prefix_match(local, remote, masklen(mask));
        }
        Some(ifa.interface_name.clone())
    }) else {
        warn!(%local, "local address not found");
        return (None, 0);
    };

    let scope = if connected {
        if_nametoindex(ifname.as_str()).unwrap_or(0)
    } else {
        0
    };

    // Take the first usable address of the opposite family on the same
    // interface.
    let alt = addrs
        .iter()
        .filter(|ifa| ifa.interface_name == ifname)
        .filter_map(|ifa| ifa.address.as_ref().and_then(sockaddr_to_ip))
        .find(|addr| match (local, addr) {
            (IpAddr::V6(_), IpAddr::V4(_)) => true,
            (IpAddr::V4(_), IpAddr::V6(addr)) => {
                // Only accept global scope addresses.
                let seg0 = addr.segments()[0];
                (seg0 & 0xffc0) != 0xfe80 && (seg0 & 0xffc0) != 0xfec0
            }
            _ => false,
        });

    (alt, scope)
}

// Reads the peer socket into a fixed-size buffer and pumps out complete
// messages, pairing every decoded message with its raw bytes for the MRT
// capture path.
pub(crate) async fn peer_read_loop(
    mut read_half: OwnedReadHalf,
    peer_id: u32,
    peer_rxp: Sender<PeerRxMsg>,
) -> Result<(), SendError<PeerRxMsg>> {
    let mut buf = [0u8; MAX_PKTSIZE];
    let mut wpos = 0;

    loop {
        // Read data from the network. A full message always fits the buffer
        // after compaction, so there is always room here.
        match read_half.read(&mut buf[wpos..]).await {
            Ok(0) => {
                // Notify that the connection was closed by the remote end.
                let msg = PeerRxMsg {
                    peer_id,
                    msg: Err(RxError::ConnClosed),
                };
                peer_rxp.send(msg).await?;
                return Ok(());
            }
            Ok(num_bytes) => wpos += num_bytes,
            Err(error)
                if error.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(error) => {
                let msg = PeerRxMsg {
                    peer_id,
                    msg: Err(RxError::ConnError(error.to_string())),
                };
                peer_rxp.send(msg).await?;
                return Ok(());
            }
        }

        // Decode buffered messages, yielding back to the scheduler after a
        // fixed budget so one flooding peer cannot starve the rest.
        let mut rpos = 0;
        let mut processed = 0;
        loop {
            let msg_len = match Message::parse_header(&buf[rpos..wpos]) {
                Ok(Some((msg_len, _))) => msg_len,
                Ok(None) => break,
                Err(error) => {
                    let msg = PeerRxMsg {
                        peer_id,
                        msg: Err(RxError::MsgDecodeError(error)),
                    };
                    peer_rxp.send(msg).await?;
                    return Ok(());
                }
            };
            if wpos - rpos < msg_len {
                break;
            }

            let raw = Bytes::copy_from_slice(&buf[rpos..rpos + msg_len]);
            match Message::decode(&raw) {
                Ok(msg) => {
                    let msg = PeerRxMsg {
                        peer_id,
                        msg: Ok((msg, raw)),
                    };
                    peer_rxp.send(msg).await?;
                }
                Err(error) => {
                    let msg = PeerRxMsg {
                        peer_id,
                        msg: Err(RxError::MsgDecodeError(error)),
                    };
                    peer_rxp.send(msg).await?;
                    return Ok(());
                }
            }

            rpos += msg_len;
            processed += 1;
            if processed > MSG_PROCESS_LIMIT {
                processed = 0;
                tokio::task::yield_now().await;
            }
        }

        // Compact the remaining bytes to the buffer base.
        buf.copy_within(rpos..wpos, 0);
        wpos -= rpos;
    }
}

// Writes queued messages to the peer socket, reporting forward progress and
// errors back to the engine. Exits once the engine drops the queue's sending
// side and everything buffered has been flushed.
pub(crate) async fn peer_write_loop(
    mut write_half: OwnedWriteHalf,
    mut msg_txc: bgpsd_utils::UnboundedReceiver<Bytes>,
    queued: Arc<AtomicUsize>,
    peer_id: u32,
    peer_txp: Sender<PeerTxMsg>,
) {
    use tokio::io::AsyncWriteExt;

    while let Some(buf) = msg_txc.recv().await {
        let result = write_half.write_all(&buf).await;
        let left =
            queued.fetch_sub(buf.len(), Ordering::Relaxed) - buf.len();

        let event = match result {
            Ok(()) => TxEvent::Progress { queued: left },
            Err(error) => TxEvent::Error(error.to_string()),
        };
        let failed = matches!(event, TxEvent::Error(_));
        let _ = peer_txp.send(PeerTxMsg { peer_id, event }).await;
        if failed {
            return;
        }
    }
}

// ===== helper functions =====

fn socket_setup(
    socket: &TcpSocket,
    conf: &PeerConfig,
) -> Result<(), std::io::Error> {
    match conf.remote_addr.address_family() {
        AddressFamily::Ipv4 => {
            // Set precedence, see RFC 1771 appendix 5.
            socket.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL)?;
            if conf.ebgp {
                // Set TTL to the foreign router's distance: 1 = direct,
                // n = multihop. With TTL security we always use 255.
                let mut ttl = conf.distance;
                if conf.ttl_security {
                    socket.set_ipv4_minttl(gtsm_minttl(conf.distance))?;
                    ttl = TTL_MAX;
                }
                socket.set_ipv4_ttl(ttl)?;
            }
        }
        AddressFamily::Ipv6 => {
            if conf.ebgp {
                let mut hops = conf.distance;
                if conf.ttl_security {
                    socket.set_ipv6_min_hopcount(gtsm_minttl(conf.distance))?;
                    hops = TTL_MAX;
                }
                socket.set_ipv6_unicast_hops(hops)?;
            }
        }
    }

    socket.set_buffer_sizes();

    Ok(())
}

// Minimum acceptable TTL under RFC 5082: 256 minus the peer's distance.
fn gtsm_minttl(distance: u8) -> u8 {
    (256u16 - distance as u16) as u8
}

fn sockaddr_to_ip(addr: &nix::sys::socket::SockaddrStorage) -> Option<IpAddr> {
    if let Some(sin) = addr.as_sockaddr_in() {
        Some(IpAddr::V4(sin.ip()))
    } else {
        addr.as_sockaddr_in6().map(|sin6| IpAddr::V6(sin6.ip()))
    }
}

fn masklen(mask: IpAddr) -> u8 {
    match mask {
        IpAddr::V4(mask) => u32::from(mask).count_ones() as u8,
        IpAddr::V6(mask) => u128::from(mask).count_ones() as u8,
    }
}

fn prefix_match(local: IpAddr, remote: IpAddr, masklen: u8) -> bool {
    ipnetwork::IpNetwork::new(local, masklen)
        .map(|net| net.contains(remote))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gtsm_boundaries() {
        assert_eq!(gtsm_minttl(1), 255);
        assert_eq!(gtsm_minttl(2), 254);
        assert_eq!(gtsm_minttl(255), 1);
    }

    #[test]
    fn netmask_lengths() {
        assert_eq!(masklen("255.255.255.0".parse().unwrap()), 24);
        assert_eq!(masklen("255.255.255.255".parse().unwrap()), 32);
        assert_eq!(masklen("ffff:ffff:ffff:ffff::".parse().unwrap()), 64);
    }

    #[test]
    fn shared_subnet() {
        let local = "192.0.2.1".parse().unwrap();
        assert!(prefix_match(local, "192.0.2.2".parse().unwrap(), 24));
        assert!(!prefix_match(local, "198.51.100.1".parse().unwrap(), 24));
    }
}
