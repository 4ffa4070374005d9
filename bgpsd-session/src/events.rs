//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpsd_utils::ip::IpAddrExt;
use bgpsd_utils::socket::{TcpConnInfo, TcpStream};
use num_traits::FromPrimitive;
use tokio::time::Instant;
use tracing::{info, warn, warn_span};

use crate::config::{
    INTERVAL_IDLE_HOLD_INITIAL, MSG_QUEUE_LOW_MARK, PEER_ID_DYN_MAX,
    PEER_ID_STATIC_MAX, PeerConfig, ReconfAction,
};
use crate::debug::Debug;
use crate::engine::EngineView;
use crate::error::{IoError, RxError};
use crate::ipc::RdeToSession;
use crate::mrt::MrtDirection;
use crate::network;
use crate::packet::capability::afi_safi_from_wire;
use crate::packet::consts::{
    CeaseSubcode, ErrorCode, GrFlags, MAX_PKTSIZE, MSGSIZE_HEADER,
    MSGSIZE_RREFRESH, MessageHeaderErrorSubcode, MessageType,
    RouteRefreshSubtype,
};
use crate::packet::message::{Message, NotificationMsg, RouteRefreshMsg};
use crate::peer::{Peer, Peers, fsm};
use crate::tasks::messages::{
    PeerRxMsg, PeerTimerMsg, PeerTxMsg, TcpConnectMsg, TxEvent,
};

// ===== TCP connection request =====

pub(crate) fn process_tcp_accept(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) {
    // Look up the peer by source address, falling back to cloning a
    // matching template peer.
    let mut peer_id = peers
        .values()
        .find(|peer| {
            !peer.conf.template
                && peer.conf.remote_addr == conn_info.remote_addr
        })
        .map(|peer| peer.conf.id);
    if peer_id.is_none() {
        peer_id = template_clone(view, peers, conn_info.remote_addr);
    }
    let Some(peer_id) = peer_id else {
        info!(
            remote = %conn_info.remote_addr,
            "connection attempt from unconfigured peer",
        );
        return;
    };
    let peer = peers.get_mut(&peer_id).unwrap();

    // Fast reconnect after a clear.
    if peer.fast_reconnect() {
        peer.passive = true;
        peer.fsm_event(view, fsm::Event::Start);
    }

    match peer.state {
        fsm::State::Connect | fsm::State::Active => {
            if peer.conn.is_some() {
                if peer.state == fsm::State::Connect {
                    // The new, inbound connection wins over the connection
                    // in progress.
                    peer.close_connection();
                } else {
                    // Drop the second connection.
                    return;
                }
            }
            connection_adopt(view, peer, stream, conn_info);
        }
        fsm::State::Established if peer.capa.neg.grestart.restart == 2 => {
            // First do the graceful restart dance...
            peer.change_state(
                view,
                fsm::State::Connect,
                Some(&fsm::Event::ConnClosed),
            );
            // ...then part of the open dance.
            connection_adopt(view, peer, stream, conn_info);
        }
        _ => {
            info!(
                remote = %conn_info.remote_addr, state = ?peer.state,
                "connection attempt discarded",
            );
        }
    }
}

// Applies socket options to the accepted stream and drives the FSM.
fn connection_adopt(
    view: &mut EngineView<'_>,
    peer: &mut Peer,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) {
    if let Err(error) = network::accepted_stream_init(&stream, &peer.conf) {
        IoError::TcpSocketError(error).log();
        return;
    }

    peer.fsm_event(view, fsm::Event::Connected(stream, conn_info));
}

// Clones the best-matching template peer for an inbound connection,
// returning the id of the new peer.
fn template_clone(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    remote_addr: IpAddr,
) -> Option<u32> {
    let template_id = peers
        .values()
        .filter(|peer| {
            peer.conf.template
                && peer.conf.remote_addr.address_family()
                    == remote_addr.address_family()
                && ipnetwork::IpNetwork::new(
                    peer.conf.remote_addr,
                    peer.conf.remote_masklen,
                )
                .map(|net| net.contains(remote_addr))
                .unwrap_or(false)
        })
        .max_by_key(|peer| peer.conf.remote_masklen)
        .map(|peer| peer.conf.id)?;

    // Find a free id in the dynamic range.
    let mut id = PEER_ID_DYN_MAX;
    while id > PEER_ID_STATIC_MAX && peers.contains_key(&id) {
        id -= 1;
    }
    if id == PEER_ID_STATIC_MAX {
        warn!("no free dynamic peer id left");
        return None;
    }

    let template = peers.get(&template_id).unwrap();
    let conf = clone_config(&template.conf, id, remote_addr, 0);
    let mut peer = Peer::new(conf);
    peer.template_id = Some(template_id);
    peer.reconf_action = ReconfAction::Keep;
    peer.init(view);
    peer.fsm_event(view, fsm::Event::Start);
    peers.insert(id, peer);

    Some(id)
}

// Derives the configuration of a cloned peer from its template.
pub(crate) fn clone_config(
    template: &PeerConfig,
    id: u32,
    remote_addr: IpAddr,
    remote_as: u32,
) -> PeerConfig {
    let mut conf = template.clone();
    conf.id = id;
    if remote_as != 0 {
        conf.remote_as = remote_as;
        conf.ebgp = conf.remote_as != conf.local_as;
        if !conf.ebgp {
            // Force enforce-as off for iBGP sessions.
            conf.enforce_as = false;
        }
    }
    conf.remote_addr = remote_addr;
    conf.remote_masklen = match remote_addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    conf.template = false;
    conf
}

// ===== TCP connection established =====

pub(crate) fn process_tcp_connect(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    msg: TcpConnectMsg,
) {
    let Some(peer) = peers.get_mut(&msg.peer_id) else {
        return;
    };
    peer.connect_task = None;

    if !matches!(peer.state, fsm::State::Connect | fsm::State::Active) {
        return;
    }

    match msg.result {
        Ok((stream, conn_info)) => {
            if peer.conn.is_some() {
                // An inbound connection was adopted in the meantime.
                return;
            }
            peer.fsm_event(view, fsm::Event::Connected(stream, conn_info));
        }
        Err(error) => {
            error.log();
            peer.fsm_event(view, fsm::Event::ConnectFail);
        }
    }
}

// ===== peer message receipt =====

pub(crate) fn process_peer_msg(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    msg: PeerRxMsg,
) {
    let Some(peer) = peers.get_mut(&msg.peer_id) else {
        return;
    };

    match msg.msg {
        Ok((msg, raw)) => {
            Debug::PeerMsgRx(&peer.conf.remote_addr, &msg).log();
            peer.stats.last_read = Some(Instant::now());
            peer.stats.msgs_rcvd.update(msg.msg_type());

            // Dump to MRT as soon as we have a full packet.
            view.mrts.dump_msg(
                peer,
                MrtDirection::In,
                msg.msg_type() == MessageType::Update,
                &raw,
            );

            match msg {
                Message::Open(msg) => {
                    peer.fsm_event(view, fsm::Event::RcvdOpen(Box::new(msg)));
                }
                Message::Update(msg) => {
                    peer.fsm_event(view, fsm::Event::RcvdUpdate(msg.data));
                }
                Message::Notification(msg) => {
                    peer.fsm_event(view, fsm::Event::RcvdNotification(msg));
                }
                Message::Keepalive(_) => {
                    peer.fsm_event(view, fsm::Event::RcvdKeepalive);
                }
                Message::RouteRefresh(msg) => {
                    process_peer_rrefresh(view, peer, msg, raw.len());
                }
            }
        }
        Err(RxError::ConnClosed) => {
            peer.fsm_event(view, fsm::Event::ConnClosed);
        }
        Err(error @ RxError::ConnError(_)) => {
            crate::error::Error::PeerRxError(peer.conf.remote_addr, error)
                .log();
            peer.fsm_event(view, fsm::Event::ConnFatal);
        }
        Err(RxError::MsgDecodeError(error)) => {
            peer.fsm_event(view, fsm::Event::RcvdDecodeError(error));
        }
    }
}

fn process_peer_rrefresh(
    view: &mut EngineView<'_>,
    peer: &mut Peer,
    msg: RouteRefreshMsg,
    raw_len: usize,
) {
    let mut subtype = RouteRefreshSubtype::from_u8(msg.subtype);

    // Check the subtype if the peer announced enhanced route refresh.
    if peer.capa.neg.enhanced_rr {
        match subtype {
            Some(RouteRefreshSubtype::Request) => {
                // No ORF support, so no oversized RREFRESH messages.
                if raw_len != MSGSIZE_RREFRESH as usize {
                    let msg = NotificationMsg::with_data(
                        ErrorCode::MessageHeaderError,
                        MessageHeaderErrorSubcode::BadMessageLength as u8,
                        (raw_len as u16).to_be_bytes().to_vec(),
                    );
                    peer.send_notification_msg(view, msg);
                    peer.fsm_event(view, fsm::Event::ConnFatal);
                    return;
                }
                peer.stats.refresh_rcvd.request += 1;
            }
            Some(RouteRefreshSubtype::BeginOfRr)
            | Some(RouteRefreshSubtype::EndOfRr) => {
                // Special handling for RFC 7313.
                if raw_len != MSGSIZE_RREFRESH as usize {
                    let error = crate::packet::error::DecodeError::from(
                        crate::packet::error::RouteRefreshMessageError::InvalidMessageLength(
                            raw_len as u16,
                        ),
                    );
                    peer.send_notification_msg(
                        view,
                        NotificationMsg::from(&error),
                    );
                    peer.fsm_event(view, fsm::Event::ConnFatal);
                    return;
                }
                if subtype == Some(RouteRefreshSubtype::BeginOfRr) {
                    peer.stats.refresh_rcvd.borr += 1;
                } else {
                    peer.stats.refresh_rcvd.eorr += 1;
                }
            }
            None => {
                warn_span!("peer", addr = %peer.conf.remote_addr).in_scope(
                    || {
                        warn!(
                            subtype = %msg.subtype,
                            "peer sent bad refresh subtype",
                        );
                    },
                );
                return;
            }
        }
    } else {
        // Force the subtype to its default.
        subtype = Some(RouteRefreshSubtype::Request);
        peer.stats.refresh_rcvd.request += 1;
    }

    // Unrecognized AFI/SAFI values are ignored.
    let Some(afi_safi) = afi_safi_from_wire(msg.afi, msg.safi) else {
        warn_span!("peer", addr = %peer.conf.remote_addr).in_scope(|| {
            warn!(
                afi = %msg.afi, safi = %msg.safi,
                "peer sent refresh for invalid AFI/SAFI pair",
            );
        });
        return;
    };

    if !peer.capa.neg.refresh && !peer.capa.neg.enhanced_rr {
        warn_span!("peer", addr = %peer.conf.remote_addr).in_scope(|| {
            warn!("peer sent unexpected refresh");
        });
        return;
    }

    view.bridges.rde(crate::ipc::SessionToRde::Refresh {
        peer_id: peer.conf.id,
        afi_safi,
        subtype: subtype.unwrap() as u8,
    });
}

// ===== peer transmit progress =====

pub(crate) fn process_peer_tx(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    msg: PeerTxMsg,
) {
    let Some(peer) = peers.get_mut(&msg.peer_id) else {
        return;
    };
    if peer.conn.is_none() {
        // Stale event from a connection that was already torn down.
        return;
    }

    match msg.event {
        TxEvent::Progress { queued } => {
            peer.stats.last_write = Some(Instant::now());
            peer.start_timer_sendholdtime(view);

            // Lift the RDE back-pressure once the queue has drained.
            let conn = peer.conn.as_mut().unwrap();
            if conn.throttled && queued < MSG_QUEUE_LOW_MARK {
                conn.throttled = false;
                view.bridges.rde(crate::ipc::SessionToRde::Xon {
                    peer_id: peer.conf.id,
                });
            }
        }
        TxEvent::Error(error) => {
            warn_span!("peer", addr = %peer.conf.remote_addr).in_scope(|| {
                warn!(%error, "write error");
            });
            peer.fsm_event(view, fsm::Event::ConnFatal);
        }
    }
}

// ===== peer timer expiry =====

pub(crate) fn process_peer_timer(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    msg: PeerTimerMsg,
) {
    let Some(peer) = peers.get_mut(&msg.peer_id) else {
        return;
    };
    peer.timers.expired(msg.timer);

    match msg.timer {
        fsm::Timer::Hold
        | fsm::Timer::SendHold
        | fsm::Timer::Keepalive
        | fsm::Timer::ConnectRetry => {
            peer.fsm_event(view, fsm::Event::Timer(msg.timer));
        }
        fsm::Timer::IdleHold => {
            peer.fsm_event(view, fsm::Event::Start);
        }
        fsm::Timer::IdleHoldReset => {
            peer.idle_hold = INTERVAL_IDLE_HOLD_INITIAL;
            peer.errcnt = 0;
        }
        fsm::Timer::CarpUndemote => {
            if peer.demoted > 0 && peer.state == fsm::State::Established {
                peer.demote(view, -1);
            }
        }
        fsm::Timer::RestartTimeout => {
            peer.graceful_stop(view);
        }
    }
}

// ===== RDE message receipt =====

pub(crate) fn process_rde_msg(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    msg: RdeToSession,
) {
    Debug::RdeMsgRx(&msg).log();

    match msg {
        RdeToSession::Update { peer_id, data } => {
            if data.len() > MAX_PKTSIZE - MSGSIZE_HEADER || data.len() < 4 {
                warn!("RDE sent invalid update");
                return;
            }
            let Some(peer) = peers.get_mut(&peer_id) else {
                warn!(%peer_id, "no such peer");
                return;
            };
            peer.update_send(view, data);
        }
        RdeToSession::UpdateErr {
            peer_id,
            errcode,
            subcode,
            data,
        } => {
            let Some(peer) = peers.get_mut(&peer_id) else {
                warn!(%peer_id, "no such peer");
                return;
            };
            let msg = NotificationMsg {
                error_code: errcode,
                error_subcode: subcode,
                data,
            };
            peer.send_notification_msg(view, msg);
            if errcode == ErrorCode::Cease as u8
                && (subcode == CeaseSubcode::MaxPrefixReached as u8
                    || subcode == CeaseSubcode::MaxSentPrefixReached as u8)
            {
                let restart = if subcode == CeaseSubcode::MaxPrefixReached as u8
                {
                    peer.conf.max_prefix_restart
                } else {
                    peer.conf.max_out_prefix_restart
                };

                peer.fsm_event(view, fsm::Event::Stop);
                if restart != 0 {
                    peer.timer_set(
                        view,
                        fsm::Timer::IdleHold,
                        60 * restart as u64,
                    );
                }
            } else {
                peer.fsm_event(view, fsm::Event::ConnFatal);
            }
        }
        RdeToSession::Refresh {
            peer_id,
            afi_safi,
            subtype,
        } => {
            let Some(peer) = peers.get_mut(&peer_id) else {
                warn!(%peer_id, "no such peer");
                return;
            };
            let Some(subtype) = RouteRefreshSubtype::from_u8(subtype) else {
                warn!(%subtype, "RDE sent invalid refresh subtype");
                return;
            };
            peer.send_rrefresh(view, afi_safi, subtype);
        }
        RdeToSession::SessionRestarted { peer_id, afi_safi } => {
            let Some(peer) = peers.get_mut(&peer_id) else {
                warn!(%peer_id, "no such peer");
                return;
            };
            let flags = peer.capa.neg.grestart.flags.get_mut(afi_safi);
            if flags.contains(GrFlags::RESTARTING) {
                info!(
                    addr = %peer.conf.remote_addr, %afi_safi,
                    "graceful restart finished",
                );
                flags.remove(GrFlags::RESTARTING);
                peer.timers.stop(fsm::Timer::RestartTimeout);

                // Signal back to the RDE to clean up stale routes.
                view.bridges.rde(crate::ipc::SessionToRde::SessionRestarted {
                    peer_id,
                    afi_safi,
                });
            }
        }
        RdeToSession::ReconfDrain => {
            // Handled by the engine before dispatching here.
            unreachable!();
        }
    }
}

// ===== interface dependency updates =====

pub(crate) fn process_dependon(
    view: &mut EngineView<'_>,
    peers: &mut Peers,
    ifname: &str,
    depend_state: bool,
) {
    let peer_ids = peers
        .values()
        .filter(|peer| peer.conf.if_depend.as_deref() == Some(ifname))
        .map(|peer| peer.conf.id)
        .collect::<Vec<_>>();

    for peer_id in peer_ids {
        let peer = peers.get_mut(&peer_id).unwrap();
        if depend_state && !peer.depend_ok {
            peer.depend_ok = true;
            peer.fsm_event(view, fsm::Event::Start);
        } else if !depend_state && peer.depend_ok {
            peer.depend_ok = false;
            peer.stop(view, CeaseSubcode::OtherConfigurationChange);
        }
    }
}
