//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::os::fd::OwnedFd;

use bgpsd_utils::UnboundedSender;
use bgpsd_utils::ip::IpAddrExt;
use bgpsd_utils::task::Task;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::peer::{Peer, fsm};

// MRT record types and subtypes (RFC 6396).
const MRT_TYPE_BGP4MP: u16 = 16;
const BGP4MP_STATE_CHANGE_AS4: u16 = 5;
const BGP4MP_MESSAGE_AS4: u16 = 4;

// Capture scope of a dump target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MrtType {
    AllIn,
    AllOut,
    UpdateIn,
    UpdateOut,
}

// Dump target description, as configured by the parent. The output
// descriptor travels separately as ancillary data.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MrtConfig {
    pub mrt_type: MrtType,
    pub peer_id: u32,
    pub group_id: u32,
}

// An attached dump target with its writer task.
#[derive(Debug)]
pub struct MrtSink {
    pub conf: MrtConfig,
    txp: UnboundedSender<Bytes>,
    _task: Task<()>,
}

// The set of attached dump targets.
#[derive(Debug, Default)]
pub struct MrtSinks(Vec<MrtSink>);

// Direction of a captured message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MrtDirection {
    In,
    Out,
}

// ===== impl MrtSinks =====

impl MrtSinks {
    // Attaches a new dump target, or redirects an existing one to a new
    // descriptor.
    pub(crate) fn open(&mut self, conf: MrtConfig, fd: OwnedFd) {
        let sink = MrtSink::new(conf.clone(), fd);
        match self.0.iter_mut().find(|sink| sink.conf == conf) {
            Some(old) => *old = sink,
            None => self.0.push(sink),
        }
    }

    // Detaches a dump target.
    pub(crate) fn close(&mut self, conf: &MrtConfig) {
        self.0.retain(|sink| sink.conf != *conf);
    }

    // Captures one BGP message exchanged with the given peer.
    pub(crate) fn dump_msg(
        &self,
        peer: &Peer,
        direction: MrtDirection,
        is_update: bool,
        msg: &Bytes,
    ) {
        for sink in self.0.iter().filter(|sink| {
            let wanted = match (direction, is_update) {
                (MrtDirection::In, true) => {
                    matches!(sink.conf.mrt_type, MrtType::AllIn | MrtType::UpdateIn)
                }
                (MrtDirection::In, false) => {
                    matches!(sink.conf.mrt_type, MrtType::AllIn)
                }
                (MrtDirection::Out, true) => {
                    matches!(sink.conf.mrt_type, MrtType::AllOut | MrtType::UpdateOut)
                }
                (MrtDirection::Out, false) => {
                    matches!(sink.conf.mrt_type, MrtType::AllOut)
                }
            };
            wanted && sink.matches(peer)
        }) {
            let mut body = BytesMut::new();
            put_bgp4mp_peer(&mut body, peer);
            body.put_slice(msg);
            sink.write(BGP4MP_MESSAGE_AS4, body);
        }
    }

    // Captures an FSM state transition of the given peer.
    pub(crate) fn dump_state(
        &self,
        peer: &Peer,
        old_state: fsm::State,
        new_state: fsm::State,
    ) {
        for sink in self.0.iter().filter(|sink| {
            matches!(sink.conf.mrt_type, MrtType::AllIn | MrtType::AllOut)
                && sink.matches(peer)
        }) {
            let mut body = BytesMut::new();
            put_bgp4mp_peer(&mut body, peer);
            body.put_u16(old_state as u16);
            body.put_u16(new_state as u16);
            sink.write(BGP4MP_STATE_CHANGE_AS4, body);
        }
    }
}

// ===== impl MrtSink =====

impl MrtSink {
    fn new(conf: MrtConfig, fd: OwnedFd) -> MrtSink {
        let (txp, mut txc) = mpsc::unbounded_channel::<Bytes>();
        let file = std::fs::File::from(fd);
        let task = Task::spawn(async move {
            let mut file = tokio::fs::File::from_std(file);
            while let Some(buf) = txc.recv().await {
                if let Err(error) = file.write_all(&buf).await {
                    warn!(%error, "failed to write mrt dump");
                    return;
                }
            }
        });

        MrtSink {
            conf,
            txp,
            _task: task,
        }
    }

    fn matches(&self, peer: &Peer) -> bool {
        (self.conf.peer_id == 0 && self.conf.group_id == 0)
            || self.conf.peer_id == peer.conf.id
            || (self.conf.group_id != 0
                && self.conf.group_id == peer.conf.group_id)
    }

    fn write(&self, subtype: u16, body: BytesMut) {
        let mut buf = BytesMut::with_capacity(12 + body.len());
        buf.put_u32(chrono::Utc::now().timestamp() as u32);
        buf.put_u16(MRT_TYPE_BGP4MP);
        buf.put_u16(subtype);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        let _ = self.txp.send(buf.freeze());
    }
}

// ===== helper functions =====

// Encodes the BGP4MP_*_AS4 peer header: AS numbers, interface index, and the
// addresses of both endpoints.
fn put_bgp4mp_peer(buf: &mut BytesMut, peer: &Peer) {
    let remote = peer.remote.unwrap_or(peer.conf.remote_addr);
    let af = remote.address_family();
    let local = peer.local.unwrap_or(IpAddr::unspecified(af));

    buf.put_u32(peer.conf.remote_as);
    buf.put_u32(peer.conf.local_as);
    buf.put_u16(peer.if_scope as u16);
    buf.put_u16(af as u16);
    match (remote, local) {
        (IpAddr::V4(remote), IpAddr::V4(local)) => {
            buf.put_slice(&remote.octets());
            buf.put_slice(&local.octets());
        }
        (IpAddr::V6(remote), IpAddr::V6(local)) => {
            buf.put_slice(&remote.octets());
            buf.put_slice(&local.octets());
        }
        (remote, _) => {
            // Mixed-family endpoints cannot be represented; fall back to an
            // unspecified local address of the remote's family.
            match remote {
                IpAddr::V4(remote) => {
                    buf.put_slice(&remote.octets());
                    buf.put_slice(&[0; 4]);
                }
                IpAddr::V6(remote) => {
                    buf.put_slice(&remote.octets());
                    buf.put_slice(&[0; 16]);
                }
            }
        }
    }
}
