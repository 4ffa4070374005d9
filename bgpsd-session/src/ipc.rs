//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::io::IoSliceMut;
use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use bgpsd_utils::Sender;
use bgpsd_utils::bgp::AfiSafi;
use bgpsd_utils::socket::UnixStream;
use bytes::{Buf, BytesMut};
use nix::sys::socket::{ControlMessageOwned, MsgFlags, UnixAddr, recvmsg};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::Interest;

use crate::config::{ListenerCfg, PeerConfig, ReconfAction, SessionCfg};
use crate::mrt::MrtConfig;
use crate::packet::capability::Capabilities;
use crate::packet::consts::{AddPathFlags, Role};

// Upper bound on the payload of a single bridge frame. UPDATE bodies are
// bounded by the BGP maximum message size; configuration payloads stay far
// below this.
const FRAME_MAX_SIZE: usize = 65536;

// Messages received from the parent process.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum ParentToSession {
    SocketConn,
    SocketConnCtl,
    ReconfConf(SessionCfg),
    ReconfPeer(PeerConfig),
    ReconfListener(ListenerCfg),
    ReconfCtrl { restricted: bool },
    ReconfDrain,
    ReconfDone,
    SessionDependon { ifname: String, depend_state: bool },
    MrtOpen(MrtConfig),
    MrtReopen(MrtConfig),
    MrtClose(MrtConfig),
}

// Messages sent to the parent process.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum SessionToParent {
    SessionDependon { ifname: String },
    PfkeyReload { peer_id: u32 },
    Demote { group: String, level: i32 },
    ReconfDrain,
    ReconfDone,
}

// Messages received from the RDE.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum RdeToSession {
    Update {
        peer_id: u32,
        data: Vec<u8>,
    },
    UpdateErr {
        peer_id: u32,
        errcode: u8,
        subcode: u8,
        data: Vec<u8>,
    },
    Refresh {
        peer_id: u32,
        afi_safi: AfiSafi,
        subtype: u8,
    },
    SessionRestarted {
        peer_id: u32,
        afi_safi: AfiSafi,
    },
    ReconfDrain,
}

// Messages sent to the RDE.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum SessionToRde {
    SessionAdd(PeerConfig),
    SessionUp { peer_id: u32, data: SessionUpData },
    SessionDown { peer_id: u32 },
    Update { peer_id: u32, data: Vec<u8> },
    Refresh { peer_id: u32, afi_safi: AfiSafi, subtype: u8 },
    SessionStale { peer_id: u32, afi_safi: AfiSafi },
    SessionNograce { peer_id: u32, afi_safi: AfiSafi },
    SessionFlush { peer_id: u32, afi_safi: AfiSafi },
    SessionRestarted { peer_id: u32, afi_safi: AfiSafi },
    Xon { peer_id: u32 },
    Xoff { peer_id: u32 },
    ReconfDrain,
}

// Session parameters announced to the RDE when a peer reaches Established.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct SessionUpData {
    pub local_addr: IpAddr,
    pub local_alt_addr: Option<IpAddr>,
    pub remote_addr: IpAddr,
    pub if_scope: u32,
    pub remote_bgpid: Ipv4Addr,
    pub short_as: u16,
    pub remote_role: Option<Role>,
    pub capa: Capabilities,
    pub add_path_any: AddPathFlags,
}

// A bridge message type, with an indication of which values arrive with a
// file descriptor attached as ancillary data.
pub trait BridgeMsg:
    DeserializeOwned + Serialize + std::fmt::Debug + Send + 'static
{
    fn carries_fd(&self) -> bool {
        false
    }
}

impl BridgeMsg for ParentToSession {
    fn carries_fd(&self) -> bool {
        match self {
            ParentToSession::SocketConn
            | ParentToSession::SocketConnCtl
            | ParentToSession::ReconfCtrl { .. }
            | ParentToSession::MrtOpen(..)
            | ParentToSession::MrtReopen(..) => true,
            ParentToSession::ReconfListener(listener) => {
                listener.reconf == ReconfAction::Reinit
            }
            _ => false,
        }
    }
}

impl BridgeMsg for RdeToSession {}

impl BridgeMsg for SessionToParent {}

impl BridgeMsg for SessionToRde {}

// ===== global functions =====

// Receives frames from a bridge stream, delivering each decoded message
// (paired with its file descriptor when the message carries one) through the
// provided channel.
//
// Returns when the remote end closes the stream or sends a frame that cannot
// be decoded.
pub(crate) async fn read_loop<M: BridgeMsg, T: Send + 'static>(
    stream: Arc<UnixStream>,
    msgp: Sender<T>,
    wrap: impl Fn(M, Option<OwnedFd>) -> T,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    let mut buf = BytesMut::new();
    let mut fds = VecDeque::new();

    loop {
        // Read data and queue any descriptors riding along with it.
        let n = stream
            .async_io(Interest::READABLE, || {
                recv_with_fds(&stream, &mut chunk, &mut fds)
            })
            .await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        // Decode as many complete frames as are buffered.
        while buf.len() >= 4 {
            let frame_len =
                u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
            if frame_len > FRAME_MAX_SIZE {
                return Err(std::io::Error::other("oversized bridge frame"));
            }
            if buf.len() < 4 + frame_len {
                break;
            }
            buf.advance(4);
            let msg: M = serde_json::from_slice(&buf[..frame_len])
                .map_err(std::io::Error::other)?;
            buf.advance(frame_len);

            let fd = if msg.carries_fd() { fds.pop_front() } else { None };
            if msgp.send(wrap(msg, fd)).await.is_err() {
                return Ok(());
            }
        }
    }
}

// Writes frames to a bridge stream as messages arrive on the channel.
pub(crate) async fn write_loop<M: BridgeMsg>(
    stream: Arc<UnixStream>,
    mut msgc: bgpsd_utils::UnboundedReceiver<M>,
) -> std::io::Result<()> {
    while let Some(msg) = msgc.recv().await {
        let payload = serde_json::to_vec(&msg).map_err(std::io::Error::other)?;
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        let mut off = 0;
        while off < frame.len() {
            stream.writable().await?;
            match stream.try_write(&frame[off..]) {
                Ok(n) => off += n,
                Err(error)
                    if error.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    continue;
                }
                Err(error) => return Err(error),
            }
        }
    }

    Ok(())
}

// Converts a received descriptor into a nonblocking bridge stream.
pub(crate) fn stream_from_fd(fd: OwnedFd) -> std::io::Result<UnixStream> {
    let stream = std::os::unix::net::UnixStream::from(fd);
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}

// ===== helper functions =====

fn recv_with_fds(
    stream: &UnixStream,
    buf: &mut [u8],
    fds: &mut VecDeque<OwnedFd>,
) -> std::io::Result<usize> {
    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 16]);

    let res = recvmsg::<UnixAddr>(
        stream.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::MSG_CMSG_CLOEXEC,
    )
    .map_err(std::io::Error::from)?;

    for cmsg in res.cmsgs().map_err(std::io::Error::from)? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            for fd in received {
                fds.push_back(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }

    Ok(res.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let msg = SessionToRde::SessionStale {
            peer_id: 7,
            afi_safi: AfiSafi::Ipv4Unicast,
        };
        let payload = serde_json::to_vec(&msg).unwrap();
        let decoded: SessionToRde = serde_json::from_slice(&payload).unwrap();
        match decoded {
            SessionToRde::SessionStale { peer_id, afi_safi } => {
                assert_eq!(peer_id, 7);
                assert_eq!(afi_safi, AfiSafi::Ipv4Unicast);
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn fd_bearing_messages() {
        assert!(ParentToSession::SocketConn.carries_fd());
        assert!(
            ParentToSession::ReconfListener(ListenerCfg {
                addr: "127.0.0.1:179".parse().unwrap(),
                reconf: ReconfAction::Reinit,
            })
            .carries_fd()
        );
        assert!(
            !ParentToSession::ReconfListener(ListenerCfg {
                addr: "127.0.0.1:179".parse().unwrap(),
                reconf: ReconfAction::Keep,
            })
            .carries_fd()
        );
        assert!(!ParentToSession::ReconfDone.carries_fd());
    }
}
