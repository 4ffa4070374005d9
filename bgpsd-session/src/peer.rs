//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bgpsd_utils::bgp::AfiSafi;
use bgpsd_utils::ip::IpAddrExt;
use bgpsd_utils::socket::{TcpConnInfo, TcpStream};
use bgpsd_utils::task::Task;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{info, warn, warn_span};

use crate::config::{
    INTERVAL_HOLD_DEMOTED, INTERVAL_HOLD_INITIAL, INTERVAL_IDLE_HOLD_INITIAL,
    INTERVAL_SEND_HOLD_MIN, MAX_IDLE_HOLD, MSG_QUEUE_HIGH_MARK, PeerConfig,
    ReconfAction, SESSION_CLEAR_DELAY,
};
use crate::debug::Debug;
use crate::engine::EngineView;
use crate::error::Error;
use crate::ipc::{SessionToParent, SessionToRde, SessionUpData};
use crate::mrt::MrtDirection;
use crate::packet::capability::Capabilities;
use crate::packet::consts::{
    AS_TRANS, AddPathFlags, BGP_VERSION, CeaseSubcode, ErrorCode,
    FsmErrorSubcode, GrFlags, MessageType, OpenMessageErrorSubcode, Role,
    RouteRefreshSubtype,
};
use crate::packet::error::{DecodeError, OpenMessageError};
use crate::packet::message::{
    KeepaliveMsg, Message, NotificationMsg, OpenMsg, RouteRefreshMsg,
    UpdateMsg,
};
use crate::tasks;

// BGP peer.
#[derive(Debug)]
pub struct Peer {
    pub conf: PeerConfig,
    // Id of the template this peer was cloned from, if any.
    pub template_id: Option<u32>,
    pub state: fsm::State,
    pub prev_state: fsm::State,
    pub reconf_action: ReconfAction,
    pub passive: bool,
    pub depend_ok: bool,
    pub demoted: i32,
    pub errcnt: u32,
    // Current IdleHold backoff, in seconds.
    pub idle_hold: u16,
    // Current hold time: the RFC-mandated initial value while the OPEN
    // exchange is in flight, the negotiated value afterwards.
    pub holdtime: u16,
    pub capa: CapabilitySets,
    pub remote_role: Option<Role>,
    pub remote_bgpid: Ipv4Addr,
    pub short_as: u16,
    // Addresses learned when the TCP connection came up.
    pub local: Option<IpAddr>,
    pub local_alt: Option<IpAddr>,
    pub remote: Option<IpAddr>,
    pub if_scope: u32,
    pub conn: Option<Connection>,
    pub connect_task: Option<Task<()>>,
    pub timers: Timers,
    pub stats: PeerStats,
}

// The three capability sets involved in negotiation.
#[derive(Clone, Debug, Default)]
pub struct CapabilitySets {
    pub ann: Capabilities,
    pub peer: Capabilities,
    pub neg: Capabilities,
}

// An established TCP connection with its I/O tasks.
//
// Dropping this handle aborts the receive task and closes the transmit
// channel; the transmit task drains whatever is still queued (for instance a
// final NOTIFICATION) and then closes the socket.
#[derive(Debug)]
pub struct Connection {
    pub conn_info: TcpConnInfo,
    pub queued: Arc<AtomicUsize>,
    pub throttled: bool,
    msg_txp: bgpsd_utils::UnboundedSender<Bytes>,
    _rx_task: Task<()>,
}

// Per-peer timer set. An absent entry means the timer is disarmed; expiry
// delivers exactly one message on the engine's timer channel.
#[derive(Debug, Default)]
pub struct Timers(BTreeMap<fsm::Timer, bgpsd_utils::task::TimeoutTask>);

// Per-peer statistics.
#[derive(Debug, Default)]
pub struct PeerStats {
    pub last_updown: Option<Instant>,
    pub last_read: Option<Instant>,
    pub last_write: Option<Instant>,
    pub last_established: Option<DateTime<Utc>>,
    pub msgs_rcvd: MessageCounters,
    pub msgs_sent: MessageCounters,
    pub refresh_rcvd: RefreshCounters,
    pub refresh_sent: RefreshCounters,
    pub last_sent_error: Option<(u8, u8)>,
    pub last_rcvd_error: Option<(u8, u8)>,
    pub last_reason: Option<String>,
}

// Per-message-type counters.
#[derive(Debug, Default)]
pub struct MessageCounters {
    pub open: u64,
    pub update: u64,
    pub notification: u64,
    pub keepalive: u64,
    pub rrefresh: u64,
}

// Per-subtype ROUTE-REFRESH counters.
#[derive(Debug, Default)]
pub struct RefreshCounters {
    pub request: u64,
    pub borr: u64,
    pub eorr: u64,
}

// Type aliases.
pub type Peers = BTreeMap<u32, Peer>;

// Finite State Machine.
pub mod fsm {
    use bgpsd_utils::socket::{TcpConnInfo, TcpStream};
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    use crate::packet::error::DecodeError;
    use crate::packet::message::{NotificationMsg, OpenMsg};

    // FSM states. The discriminants match the state encoding of MRT
    // state-change records.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        None = 0,
        Idle = 1,
        Connect = 2,
        Active = 3,
        OpenSent = 4,
        OpenConfirm = 5,
        Established = 6,
    }

    // FSM events.
    //
    // The original RFC FSM events are listed above each event for clarity.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart
        // AutomaticStart
        Start,
        // ManualStop
        Stop,
        // Tcp_CR_Acked
        // TcpConnectionConfirmed
        Connected(TcpStream, TcpConnInfo),
        // TcpConnectionFails (while connecting)
        ConnectFail,
        // TcpConnectionFails (remote close on an open connection)
        ConnClosed,
        // TcpConnectionFails (local socket error)
        ConnFatal,
        // BGPOpen
        RcvdOpen(Box<OpenMsg>),
        // KeepAliveMsg
        RcvdKeepalive,
        // UpdateMsg
        RcvdUpdate(Bytes),
        // NotifMsg
        RcvdNotification(NotificationMsg),
        // BGPHeaderErr
        // BGPOpenMsgErr
        RcvdDecodeError(DecodeError),
        // ConnectRetryTimer_Expires
        // HoldTimer_Expires
        // KeepaliveTimer_Expires
        Timer(Timer),
    }

    // Per-peer timers.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Keepalive,
        Hold,
        SendHold,
        IdleHold,
        IdleHoldReset,
        CarpUndemote,
        RestartTimeout,
    }
}

// ===== impl Peer =====

impl Peer {
    // Creates a new peer in the None state; it is initialized by the engine's
    // next housekeeping pass.
    pub(crate) fn new(conf: PeerConfig) -> Peer {
        Peer {
            conf,
            template_id: None,
            state: fsm::State::None,
            prev_state: fsm::State::None,
            reconf_action: ReconfAction::Reinit,
            passive: false,
            depend_ok: true,
            demoted: 0,
            errcnt: 0,
            idle_hold: 0,
            holdtime: 0,
            capa: Default::default(),
            remote_role: None,
            remote_bgpid: Ipv4Addr::UNSPECIFIED,
            short_as: 0,
            local: None,
            local_alt: None,
            remote: None,
            if_scope: 0,
            conn: None,
            connect_task: None,
            timers: Default::default(),
            stats: Default::default(),
        }
    }

    // Initializes a freshly configured peer.
    pub(crate) fn init(&mut self, view: &mut EngineView<'_>) {
        if let Some(ifname) = &self.conf.if_depend {
            self.depend_ok = false;
            view.bridges.parent(SessionToParent::SessionDependon {
                ifname: ifname.clone(),
            });
        } else {
            self.depend_ok = true;
        }

        self.change_state(view, fsm::State::Idle, None);
        if self.conf.down {
            // No autostart.
            self.timers.stop(fsm::Timer::IdleHold);
        } else {
            self.timer_set(view, fsm::Timer::IdleHold, SESSION_CLEAR_DELAY.into());
        }

        self.stats.last_updown = Some(Instant::now());

        // On startup, demote if requested. Peers added at runtime must reach
        // Established before their demotion is lifted, so they are excluded.
        if self.reconf_action != ReconfAction::Reinit
            && self.conf.demote_group.is_some()
        {
            self.demote(view, 1);
        }
    }

    // Injects an event into the peer's FSM.
    pub(crate) fn fsm_event(
        &mut self,
        view: &mut EngineView<'_>,
        event: fsm::Event,
    ) {
        Debug::PeerFsmEvent(&self.conf.remote_addr, &event).log();

        // A message that failed to decode tears the session down the same
        // way regardless of the session state.
        if let fsm::Event::RcvdDecodeError(error) = &event {
            if self.state >= fsm::State::OpenSent {
                self.errcnt += 1;
                let capa_probe = matches!(
                    error,
                    DecodeError::OpenMessage(
                        OpenMessageError::UnsupportedOptParam(_)
                    )
                );
                let msg = NotificationMsg::from(error);
                self.send_notification_msg(view, msg);
                self.change_state(
                    view,
                    fsm::State::Idle,
                    Some(&fsm::Event::ConnFatal),
                );
                if capa_probe {
                    // Be generous during capability probing.
                    self.idle_hold_soften(view);
                }
            }
            return;
        }

        match self.state {
            fsm::State::None => {
                // Nothing; the peer has not been initialized yet.
            }
            fsm::State::Idle => match event {
                fsm::Event::Start => {
                    self.timers.stop(fsm::Timer::Hold);
                    self.timers.stop(fsm::Timer::SendHold);
                    self.timers.stop(fsm::Timer::Keepalive);
                    self.timers.stop(fsm::Timer::IdleHold);

                    if !self.depend_ok {
                        self.timers.stop(fsm::Timer::ConnectRetry);
                    } else if self.passive
                        || self.conf.passive
                        || self.conf.template
                    {
                        self.change_state(
                            view,
                            fsm::State::Active,
                            Some(&event),
                        );
                        self.timers.stop(fsm::Timer::ConnectRetry);
                    } else {
                        self.change_state(
                            view,
                            fsm::State::Connect,
                            Some(&event),
                        );
                        self.timer_set(
                            view,
                            fsm::Timer::ConnectRetry,
                            view.conf.connect_retry.into(),
                        );
                        self.connect(view);
                    }
                    self.passive = false;
                }
                _ => {
                    // Ignore.
                }
            },
            fsm::State::Connect => match event {
                fsm::Event::Start => {
                    // Ignore.
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connection_setup(view, stream, conn_info);
                    self.change_state(view, fsm::State::OpenSent, None);
                }
                fsm::Event::ConnectFail => {
                    self.timer_set(
                        view,
                        fsm::Timer::ConnectRetry,
                        view.conf.connect_retry.into(),
                    );
                    self.close_connection();
                    self.change_state(view, fsm::State::Active, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.timer_set(
                        view,
                        fsm::Timer::ConnectRetry,
                        view.conf.connect_retry.into(),
                    );
                    self.connect(view);
                }
                event => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
            },
            fsm::State::Active => match event {
                fsm::Event::Start => {
                    // Ignore.
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connection_setup(view, stream, conn_info);
                    self.change_state(view, fsm::State::OpenSent, None);
                }
                fsm::Event::ConnectFail => {
                    self.timer_set(
                        view,
                        fsm::Timer::ConnectRetry,
                        view.conf.connect_retry.into(),
                    );
                    self.close_connection();
                    self.change_state(view, fsm::State::Active, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.timer_set(
                        view,
                        fsm::Timer::ConnectRetry,
                        self.holdtime.into(),
                    );
                    self.change_state(view, fsm::State::Connect, Some(&event));
                    self.connect(view);
                }
                event => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
            },
            fsm::State::OpenSent => match event {
                fsm::Event::Start => {
                    // Ignore.
                }
                fsm::Event::Stop => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::ConnClosed => {
                    self.close_connection();
                    self.timer_set(
                        view,
                        fsm::Timer::ConnectRetry,
                        view.conf.connect_retry.into(),
                    );
                    self.change_state(view, fsm::State::Active, Some(&event));
                }
                fsm::Event::ConnFatal => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    self.send_notification(
                        view,
                        ErrorCode::HoldTimerExpired,
                        0,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::SendHold) => {
                    self.send_notification(
                        view,
                        ErrorCode::SendHoldTimerExpired,
                        0,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                event @ fsm::Event::RcvdOpen(_) => {
                    let fsm::Event::RcvdOpen(msg) = &event else {
                        unreachable!();
                    };
                    let next_state = self.open_process(view, (**msg).clone());
                    if next_state == fsm::State::OpenConfirm {
                        self.send_keepalive(view);
                    }
                    self.change_state(view, next_state, Some(&event));
                }
                fsm::Event::RcvdNotification(msg) => {
                    let capa_probe = self.process_notification(&msg);
                    self.change_state(
                        view,
                        fsm::State::Idle,
                        Some(&fsm::Event::RcvdNotification(msg)),
                    );
                    if capa_probe {
                        // Don't punish, the peer is probing capabilities.
                        self.idle_hold_soften(view);
                    }
                }
                event => {
                    self.send_notification(
                        view,
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenSent as u8,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
            },
            fsm::State::OpenConfirm => match event {
                fsm::Event::Start => {
                    // Ignore.
                }
                fsm::Event::Stop => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::ConnClosed | fsm::Event::ConnFatal => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    self.send_notification(
                        view,
                        ErrorCode::HoldTimerExpired,
                        0,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::SendHold) => {
                    self.send_notification(
                        view,
                        ErrorCode::SendHoldTimerExpired,
                        0,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::Keepalive) => {
                    self.send_keepalive(view);
                }
                fsm::Event::RcvdKeepalive => {
                    self.start_timer_holdtime(view);
                    self.change_state(
                        view,
                        fsm::State::Established,
                        Some(&event),
                    );
                }
                fsm::Event::RcvdNotification(msg) => {
                    self.process_notification(&msg);
                    self.change_state(
                        view,
                        fsm::State::Idle,
                        Some(&fsm::Event::RcvdNotification(msg)),
                    );
                }
                event => {
                    self.send_notification(
                        view,
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm as u8,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
            },
            fsm::State::Established => match event {
                fsm::Event::Start => {
                    // Ignore.
                }
                fsm::Event::Stop => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::ConnClosed | fsm::Event::ConnFatal => {
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    self.send_notification(
                        view,
                        ErrorCode::HoldTimerExpired,
                        0,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::SendHold) => {
                    self.send_notification(
                        view,
                        ErrorCode::SendHoldTimerExpired,
                        0,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
                fsm::Event::Timer(fsm::Timer::Keepalive) => {
                    self.send_keepalive(view);
                }
                fsm::Event::RcvdKeepalive => {
                    self.start_timer_holdtime(view);
                }
                fsm::Event::RcvdUpdate(data) => {
                    self.start_timer_holdtime(view);
                    view.bridges.rde(SessionToRde::Update {
                        peer_id: self.conf.id,
                        data: data.to_vec(),
                    });
                }
                fsm::Event::RcvdNotification(msg) => {
                    self.process_notification(&msg);
                    self.change_state(
                        view,
                        fsm::State::Idle,
                        Some(&fsm::Event::RcvdNotification(msg)),
                    );
                }
                event => {
                    self.send_notification(
                        view,
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInEstablished as u8,
                        vec![],
                    );
                    self.change_state(view, fsm::State::Idle, Some(&event));
                }
            },
        }
    }

    // Updates the peer's FSM state, performing the entry actions of the new
    // state. `event` is None for administrative transitions that must not
    // affect the reconnect backoff.
    pub(crate) fn change_state(
        &mut self,
        view: &mut EngineView<'_>,
        state: fsm::State,
        event: Option<&fsm::Event>,
    ) {
        match state {
            fsm::State::Idle => {
                // Carp demotion first. New peers are handled in init.
                if self.state == fsm::State::Established
                    && self.conf.demote_group.is_some()
                    && self.demoted == 0
                {
                    self.demote(view, 1);
                }

                // The transmit task flushes what is still buffered (maybe a
                // notification) before it closes the socket.

                // The timer for the next Start must be armed here. If this
                // is an error path and the session was not established
                // successfully before, the interval backs off exponentially.
                if self.idle_hold == 0 {
                    self.idle_hold = INTERVAL_IDLE_HOLD_INITIAL;
                }
                self.holdtime = INTERVAL_HOLD_INITIAL;
                self.timers.stop(fsm::Timer::ConnectRetry);
                self.timers.stop(fsm::Timer::Keepalive);
                self.timers.stop(fsm::Timer::Hold);
                self.timers.stop(fsm::Timer::SendHold);
                self.timers.stop(fsm::Timer::IdleHold);
                self.timers.stop(fsm::Timer::IdleHoldReset);
                self.close_connection();
                self.capa.peer = Default::default();
                if self.template_id.is_none() {
                    view.bridges.parent(SessionToParent::PfkeyReload {
                        peer_id: self.conf.id,
                    });
                }

                if !matches!(event, Some(fsm::Event::Stop)) {
                    self.timer_set(view, fsm::Timer::IdleHold, self.idle_hold.into());
                    if event.is_some() && self.idle_hold < MAX_IDLE_HOLD / 2 {
                        self.idle_hold *= 2;
                    }
                }
                if self.state == fsm::State::Established {
                    if self.capa.neg.grestart.restart == 2
                        && matches!(
                            event,
                            Some(
                                fsm::Event::ConnClosed | fsm::Event::ConnFatal
                            )
                        )
                    {
                        // Don't punish graceful restart.
                        self.idle_hold_soften(view);
                        self.graceful_restart(view);
                    } else {
                        self.session_down(view);
                    }
                }
                if self.state == fsm::State::None
                    || self.state == fsm::State::Established
                {
                    // Initialize capability negotiation structures.
                    self.capa.ann = self.conf.capabilities.clone();
                    if !self.conf.announce_capa {
                        self.capa.ann = Default::default();
                    }
                }
            }
            fsm::State::Connect => {
                if self.state == fsm::State::Established
                    && self.capa.neg.grestart.restart == 2
                {
                    // Do the graceful restart dance.
                    self.graceful_restart(view);
                    self.holdtime = INTERVAL_HOLD_INITIAL;
                    self.timers.stop(fsm::Timer::ConnectRetry);
                    self.timers.stop(fsm::Timer::Keepalive);
                    self.timers.stop(fsm::Timer::Hold);
                    self.timers.stop(fsm::Timer::SendHold);
                    self.timers.stop(fsm::Timer::IdleHold);
                    self.timers.stop(fsm::Timer::IdleHoldReset);
                    self.close_connection();
                    self.capa.peer = Default::default();
                }
            }
            fsm::State::Active => {
                if self.template_id.is_none() {
                    view.bridges.parent(SessionToParent::PfkeyReload {
                        peer_id: self.conf.id,
                    });
                }
            }
            fsm::State::OpenSent | fsm::State::OpenConfirm => {}
            fsm::State::Established => {
                self.timer_set(
                    view,
                    fsm::Timer::IdleHoldReset,
                    self.idle_hold.into(),
                );
                if self.demoted > 0 {
                    self.timer_set(
                        view,
                        fsm::Timer::CarpUndemote,
                        INTERVAL_HOLD_DEMOTED.into(),
                    );
                }
                self.stats.last_established = Some(Utc::now());
                self.session_up(view);
            }
            fsm::State::None => {
                // Peers are never moved back to the None state.
            }
        }

        Debug::PeerFsmTransition(&self.conf.remote_addr, self.state, state)
            .log();
        view.mrts.dump_state(self, self.state, state);
        self.prev_state = self.state;
        self.state = state;
    }

    // Starts an outbound TCP connection unless one is already in place.
    //
    // The overcomplicated collision detection of RFC 1771 is not needed; it
    // suffices to make sure there is only ever one concurrent TCP connection
    // per peer.
    fn connect(&mut self, view: &mut EngineView<'_>) {
        if self.conn.is_some() {
            return;
        }

        self.connect_task =
            Some(tasks::tcp_connect(self, &view.tx.tcp_connect));
    }

    // Records the connection endpoints and spawns the I/O tasks for an
    // established TCP connection, then sends the OPEN message.
    fn connection_setup(
        &mut self,
        view: &mut EngineView<'_>,
        stream: TcpStream,
        conn_info: TcpConnInfo,
    ) {
        self.connect_task = None;
        self.local = Some(conn_info.local_addr);
        self.remote = Some(conn_info.remote_addr);
        let (local_alt, if_scope) = crate::network::alternate_addr(
            conn_info.local_addr,
            conn_info.remote_addr,
        );
        self.local_alt = local_alt;
        self.if_scope = if_scope;

        // Split the TCP stream into two halves and spawn the I/O tasks. The
        // transmit task is detached so that messages queued during shutdown
        // are still delivered.
        let (read_half, write_half) = stream.into_split();
        let queued = Arc::new(AtomicUsize::new(0));
        let (msg_txp, msg_txc) = tokio::sync::mpsc::unbounded_channel();
        let rx_task = tasks::peer_rx(self, read_half, &view.tx.peer_rx);
        let mut tx_task = tasks::peer_tx(
            self,
            write_half,
            msg_txc,
            queued.clone(),
            &view.tx.peer_tx,
        );
        tx_task.detach();

        self.conn = Some(Connection {
            conn_info,
            queued,
            throttled: false,
            msg_txp,
            _rx_task: rx_task,
        });

        // Send the OPEN message and start the initial hold timer.
        self.open_send(view);
        self.timers.stop(fsm::Timer::ConnectRetry);
        self.holdtime = INTERVAL_HOLD_INITIAL;
        self.start_timer_holdtime(view);
    }

    // Closes the TCP connection, aborting the receive task and letting the
    // transmit task drain and exit.
    pub(crate) fn close_connection(&mut self) {
        self.conn = None;
        self.connect_task = None;
    }

    // Enqueues a single BGP message for transmission.
    pub(crate) fn message_send(
        &mut self,
        view: &mut EngineView<'_>,
        msg: Message,
    ) {
        Debug::PeerMsgTx(&self.conf.remote_addr, &msg).log();

        let is_update = msg.msg_type() == MessageType::Update;
        if let Message::Notification(msg) = &msg {
            self.stats.last_sent_error =
                Some((msg.error_code, msg.error_subcode));
        }
        self.stats.msgs_sent.update(msg.msg_type());

        let buf = msg.encode();
        view.mrts.dump_msg(self, MrtDirection::Out, is_update, &buf);

        let Some(conn) = &mut self.conn else {
            return;
        };
        let queued =
            conn.queued.fetch_add(buf.len(), Ordering::Relaxed) + buf.len();
        // Ignore any possible error as the connection might have gone down
        // already.
        let _ = conn.msg_txp.send(buf);

        // Apply back-pressure to the RDE once too much data piles up.
        if !conn.throttled && queued > MSG_QUEUE_HIGH_MARK {
            conn.throttled = true;
            view.bridges.rde(SessionToRde::Xoff {
                peer_id: self.conf.id,
            });
        }
    }

    // Sends a BGP OPEN message based on the local configuration.
    fn open_send(&mut self, view: &mut EngineView<'_>) {
        let mut capa = self.capa.ann.clone();

        // Only set the Restart flag if no graceful restart is ongoing.
        capa.grestart.restart_bit = !AfiSafi::ALL.iter().any(|afi_safi| {
            self.capa
                .neg
                .grestart
                .flags
                .get(*afi_safi)
                .contains(GrFlags::RESTARTING)
        });

        // The open policy role is only meaningful on eBGP sessions covering
        // IPv4 or IPv6 unicast.
        let role = if self.conf.ebgp && capa.policy > 0 {
            self.conf.role
        } else {
            None
        };
        let as4 = capa.as4byte.then_some(self.conf.local_as);

        let holdtime = self.conf.holdtime(view.conf);

        let msg = Message::Open(OpenMsg {
            version: BGP_VERSION,
            short_as: self.conf.local_short_as,
            holdtime,
            identifier: view.conf.bgpid,
            capa,
            role,
            as4,
        });
        self.message_send(view, msg);
    }

    // Sends a KEEPALIVE message and rearms the keepalive timer.
    fn send_keepalive(&mut self, view: &mut EngineView<'_>) {
        self.message_send(view, Message::Keepalive(KeepaliveMsg {}));
        self.start_timer_keepalive(view);
    }

    // Sends an UPDATE handed down by the RDE.
    pub(crate) fn update_send(
        &mut self,
        view: &mut EngineView<'_>,
        data: Vec<u8>,
    ) {
        if self.state != fsm::State::Established {
            return;
        }

        let msg = Message::Update(UpdateMsg {
            data: Bytes::from(data),
        });
        self.message_send(view, msg);
        self.start_timer_keepalive(view);
    }

    // Sends a NOTIFICATION message. Only one NOTIFICATION may be sent per
    // session; later requests are ignored.
    pub(crate) fn send_notification(
        &mut self,
        view: &mut EngineView<'_>,
        error_code: ErrorCode,
        error_subcode: u8,
        data: Vec<u8>,
    ) {
        self.send_notification_msg(
            view,
            NotificationMsg::with_data(error_code, error_subcode, data),
        );
    }

    pub(crate) fn send_notification_msg(
        &mut self,
        view: &mut EngineView<'_>,
        msg: NotificationMsg,
    ) {
        if self.stats.last_sent_error.is_some() {
            // Some notification was already sent.
            return;
        }

        warn_span!("peer", addr = %self.conf.remote_addr).in_scope(|| {
            warn!(
                error_code = %msg.error_code,
                error_subcode = %msg.error_subcode,
                "sending notification",
            );
        });
        self.message_send(view, Message::Notification(msg));
    }

    // Sends a ROUTE-REFRESH message.
    pub(crate) fn send_rrefresh(
        &mut self,
        view: &mut EngineView<'_>,
        afi_safi: AfiSafi,
        subtype: RouteRefreshSubtype,
    ) {
        use crate::packet::capability::AfiSafiExt;

        match subtype {
            RouteRefreshSubtype::Request => {
                self.stats.refresh_sent.request += 1;
            }
            RouteRefreshSubtype::BeginOfRr | RouteRefreshSubtype::EndOfRr => {
                // Demarcation requires enhanced route refresh.
                if !self.capa.neg.enhanced_rr {
                    return;
                }
                match subtype {
                    RouteRefreshSubtype::BeginOfRr => {
                        self.stats.refresh_sent.borr += 1
                    }
                    _ => self.stats.refresh_sent.eorr += 1,
                }
            }
        }

        let msg = Message::RouteRefresh(RouteRefreshMsg {
            afi: afi_safi.afi() as u16,
            subtype: subtype as u8,
            safi: afi_safi.safi() as u8,
        });
        self.message_send(view, msg);
    }

    // Starts (or stops, for a zero hold time) the session hold timer.
    pub(crate) fn start_timer_holdtime(&mut self, view: &mut EngineView<'_>) {
        if self.holdtime > 0 {
            self.timer_set(view, fsm::Timer::Hold, self.holdtime.into());
        } else {
            self.timers.stop(fsm::Timer::Hold);
        }
    }

    // Starts (or stops) the keepalive timer at a third of the hold time.
    fn start_timer_keepalive(&mut self, view: &mut EngineView<'_>) {
        if self.holdtime > 0 {
            self.timer_set(view, fsm::Timer::Keepalive, (self.holdtime / 3).into());
        } else {
            self.timers.stop(fsm::Timer::Keepalive);
        }
    }

    // Rearms the send hold timer after forward write progress.
    pub(crate) fn start_timer_sendholdtime(
        &mut self,
        view: &mut EngineView<'_>,
    ) {
        if self.holdtime > 0 {
            self.timer_set(
                view,
                fsm::Timer::SendHold,
                std::cmp::max(INTERVAL_SEND_HOLD_MIN, self.holdtime).into(),
            );
        }
    }

    pub(crate) fn timer_set(
        &mut self,
        view: &mut EngineView<'_>,
        timer: fsm::Timer,
        seconds: u64,
    ) {
        let task = tasks::peer_timer(
            self.conf.id,
            timer,
            seconds,
            &view.tx.peer_timer,
        );
        self.timers.0.insert(timer, task);
    }

    // Halves the IdleHold backoff and rearms the timer for an immediate
    // reconnect.
    fn idle_hold_soften(&mut self, view: &mut EngineView<'_>) {
        self.timer_set(view, fsm::Timer::IdleHold, 0);
        self.idle_hold /= 2;
    }

    // Processes the received OPEN message while in the OpenSent state,
    // returning the state to transition to.
    fn open_process(
        &mut self,
        view: &mut EngineView<'_>,
        msg: OpenMsg,
    ) -> fsm::State {
        // Validate the hold time against the configured minimum.
        let min_holdtime = self.conf.min_holdtime(view.conf);
        if msg.holdtime != 0 && msg.holdtime < min_holdtime {
            Error::PeerBadHoldTime(self.conf.remote_addr, msg.holdtime).log();
            self.send_notification(
                view,
                ErrorCode::OpenMessageError,
                OpenMessageErrorSubcode::UnacceptableHoldTime as u8,
                vec![],
            );
            return fsm::State::Idle;
        }

        // The negotiated hold time is the smaller of both sides' values,
        // including zero, which disables keepalives altogether.
        let my_holdtime = self.conf.holdtime(view.conf);
        self.holdtime = std::cmp::min(msg.holdtime, my_holdtime);

        self.short_as = msg.short_as;
        self.remote_bgpid = msg.identifier;

        // If the configured remote AS is zero and this is a cloned peer,
        // adopt whatever the peer sent.
        let peer_as = msg.real_as();
        if self.template_id.is_some()
            && self.conf.remote_as == 0
            && peer_as != AS_TRANS as u32
        {
            self.conf.remote_as = peer_as;
            self.conf.ebgp = self.conf.remote_as != self.conf.local_as;
            if !self.conf.ebgp {
                // Force enforce-as off for iBGP sessions.
                self.conf.enforce_as = false;
            }
        }

        if self.conf.remote_as != peer_as {
            Error::PeerBadAs(
                self.conf.remote_addr,
                peer_as,
                self.conf.remote_as,
            )
            .log();
            self.send_notification(
                view,
                ErrorCode::OpenMessageError,
                OpenMessageErrorSubcode::BadPeerAs as u8,
                vec![],
            );
            return fsm::State::Idle;
        }

        // On iBGP sessions check for a BGP identifier collision.
        if !self.conf.ebgp && msg.identifier == view.conf.bgpid {
            Error::PeerBadIdentifier(self.conf.remote_addr, msg.identifier)
                .log();
            self.send_notification(
                view,
                ErrorCode::OpenMessageError,
                OpenMessageErrorSubcode::BadBgpIdentifier as u8,
                vec![],
            );
            return fsm::State::Idle;
        }

        self.capa.peer = msg.capa;
        self.remote_role = msg.role;

        match self.capa_neg_calc() {
            Ok(flushes) => {
                for afi_safi in flushes {
                    view.bridges.rde(SessionToRde::SessionFlush {
                        peer_id: self.conf.id,
                        afi_safi,
                    });
                }
            }
            Err(suberr) => {
                self.send_notification(
                    view,
                    ErrorCode::OpenMessageError,
                    suberr as u8,
                    vec![],
                );
                return fsm::State::Idle;
            }
        }

        fsm::State::OpenConfirm
    }

    // Computes the negotiated capability set from the announced and received
    // ones. A capability is accepted only if both sides announced it.
    //
    // Returns the address families whose graceful restart ended without the
    // peer restarting; the RDE must flush those.
    pub(crate) fn capa_neg_calc(
        &mut self,
    ) -> Result<Vec<AfiSafi>, OpenMessageErrorSubcode> {
        let mut flushes = Vec::new();
        let ann = self.capa.ann.clone();

        self.capa.neg.refresh = ann.refresh && self.capa.peer.refresh;
        self.capa.neg.enhanced_rr =
            ann.enhanced_rr && self.capa.peer.enhanced_rr;
        self.capa.neg.as4byte = ann.as4byte && self.capa.peer.as4byte;

        // MP: both sides must agree on the AFI,SAFI pair.
        let mut hasmp = false;
        for afi_safi in AfiSafi::ALL {
            let announced = *ann.mp.get(afi_safi);
            *self.capa.neg.mp.get_mut(afi_safi) =
                announced && *self.capa.peer.mp.get(afi_safi);
            if announced {
                hasmp = true;
            }
        }
        // If no MP capability is present, default to IPv4 unicast mode.
        if !hasmp {
            *self.capa.neg.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        }

        // Graceful restart: the new peer capabilities need to be compared
        // with the previous negotiated state. Address families that are not
        // part of the MP capability are treated as not being present, and a
        // flush must happen if the session stopped supporting graceful
        // restart while we were preserving its routes.
        for afi_safi in AfiSafi::ALL {
            if self
                .capa
                .peer
                .grestart
                .flags
                .get(afi_safi)
                .contains(GrFlags::PRESENT)
                && !*self.capa.neg.mp.get(afi_safi)
            {
                *self.capa.peer.grestart.flags.get_mut(afi_safi) =
                    GrFlags::empty();
            }

            let negflags = *self.capa.neg.grestart.flags.get(afi_safi);
            *self.capa.neg.grestart.flags.get_mut(afi_safi) =
                *self.capa.peer.grestart.flags.get(afi_safi);
            if negflags.contains(GrFlags::RESTARTING) {
                if ann.grestart.restart != 0
                    && self
                        .capa
                        .peer
                        .grestart
                        .flags
                        .get(afi_safi)
                        .contains(GrFlags::FORWARD)
                {
                    self.capa
                        .neg
                        .grestart
                        .flags
                        .get_mut(afi_safi)
                        .insert(GrFlags::RESTARTING);
                } else {
                    warn_span!("peer", addr = %self.conf.remote_addr)
                        .in_scope(|| {
                            warn!(
                                %afi_safi,
                                "graceful restart not restarted, flushing",
                            );
                        });
                    flushes.push(afi_safi);
                }
            }
        }
        self.capa.neg.grestart.timeout = self.capa.peer.grestart.timeout;
        self.capa.neg.grestart.restart = self.capa.peer.grestart.restart;
        if ann.grestart.restart == 0 {
            self.capa.neg.grestart.restart = 0;
        }

        // ADD-PATH: set only those bits where both sides agree, comparing
        // our send bit with the peer's receive bit and vice versa. The flags
        // are stored from this system's view point.
        self.capa.neg.add_path = Default::default();
        for afi_safi in AfiSafi::ALL {
            let ours = *ann.add_path.get(afi_safi);
            let theirs = *self.capa.peer.add_path.get(afi_safi);
            let neg = self.capa.neg.add_path.get_mut(afi_safi);
            if ours.contains(AddPathFlags::RECV)
                && theirs.contains(AddPathFlags::SEND)
            {
                neg.insert(AddPathFlags::RECV);
            }
            if ours.contains(AddPathFlags::SEND)
                && theirs.contains(AddPathFlags::RECV)
            {
                neg.insert(AddPathFlags::SEND);
            }
        }

        // Open policy: make sure the roles match, so the RDE can inject the
        // OTC attribute. These checks only apply to eBGP sessions.
        if ann.policy != 0 && self.capa.peer.policy != 0 && self.conf.ebgp {
            if !role_compatible(self.conf.role, self.remote_role) {
                warn_span!("peer", addr = %self.conf.remote_addr).in_scope(
                    || {
                        warn!(
                            local = ?self.conf.role,
                            remote = ?self.remote_role,
                            "open policy role mismatch",
                        );
                    },
                );
                return Err(OpenMessageErrorSubcode::RoleMismatch);
            }
            self.capa.neg.policy = 1;
        } else if ann.policy == 2 && self.conf.ebgp {
            // The open policy role capability is enforced but not present.
            warn_span!("peer", addr = %self.conf.remote_addr).in_scope(|| {
                warn!("open policy role enforced but not present");
            });
            return Err(OpenMessageErrorSubcode::RoleMismatch);
        }

        Ok(flushes)
    }

    // Processes a received NOTIFICATION, returning whether it rejected our
    // optional parameters (in which case the next OPEN announces none).
    pub(crate) fn process_notification(&mut self, msg: &NotificationMsg) -> bool {
        self.errcnt += 1;
        self.stats.last_rcvd_error = Some((msg.error_code, msg.error_subcode));

        self.stats.last_reason = msg.shutdown_reason();
        warn_span!("peer", addr = %self.conf.remote_addr).in_scope(|| {
            warn!(
                error_code = %msg.error_code,
                error_subcode = %msg.error_subcode,
                reason = self.stats.last_reason.as_deref().unwrap_or(""),
                "received notification",
            );
        });

        if msg.error_code == ErrorCode::OpenMessageError as u8
            && msg.error_subcode
                == OpenMessageErrorSubcode::UnsupportedOptParam as u8
        {
            // The peer cannot deal with our optional parameters; retry the
            // session without announcing any capabilities.
            self.capa.ann = Default::default();
            return true;
        }

        false
    }

    // Graceful restart bookkeeping when an established session drops: keep
    // the routes of restarting address families, flush the others.
    fn graceful_restart(&mut self, view: &mut EngineView<'_>) {
        self.timer_set(
            view,
            fsm::Timer::RestartTimeout,
            self.capa.neg.grestart.timeout.into(),
        );

        for afi_safi in AfiSafi::ALL {
            let flags = self.capa.neg.grestart.flags.get_mut(afi_safi);
            if flags.contains(GrFlags::PRESENT) {
                flags.insert(GrFlags::RESTARTING);
                info!(
                    addr = %self.conf.remote_addr, %afi_safi,
                    "graceful restart, keeping routes",
                );
                view.bridges.rde(SessionToRde::SessionStale {
                    peer_id: self.conf.id,
                    afi_safi,
                });
            } else if *self.capa.neg.mp.get(afi_safi) {
                info!(
                    addr = %self.conf.remote_addr, %afi_safi,
                    "graceful restart, flushing routes",
                );
                view.bridges.rde(SessionToRde::SessionNograce {
                    peer_id: self.conf.id,
                    afi_safi,
                });
            }
        }
    }

    // Flushes the address families still marked restarting; called when the
    // restart timeout fires before the peer came back.
    pub(crate) fn graceful_stop(&mut self, view: &mut EngineView<'_>) {
        for afi_safi in AfiSafi::ALL {
            // Only flush if the peer is restarting and the timeout fired. In
            // all other cases the session was already flushed when the
            // session went down or when the new OPEN message was parsed.
            let flags = self.capa.neg.grestart.flags.get_mut(afi_safi);
            if flags.contains(GrFlags::RESTARTING) {
                warn_span!("peer", addr = %self.conf.remote_addr).in_scope(
                    || {
                        warn!(%afi_safi, "graceful restart timed out, flushing");
                    },
                );
                view.bridges.rde(SessionToRde::SessionFlush {
                    peer_id: self.conf.id,
                    afi_safi,
                });
            }
            flags.remove(GrFlags::RESTARTING);
        }
    }

    // Announces the established session to the RDE.
    fn session_up(&mut self, view: &mut EngineView<'_>) {
        // Clear last errors, now that the session is up.
        self.stats.last_sent_error = None;
        self.stats.last_rcvd_error = None;
        self.stats.last_reason = None;

        view.bridges
            .rde(SessionToRde::SessionAdd(self.conf.clone()));

        let remote_addr = self.remote.unwrap_or(self.conf.remote_addr);
        let data = SessionUpData {
            local_addr: self.local.unwrap_or(IpAddr::unspecified(
                remote_addr.address_family(),
            )),
            local_alt_addr: self.local_alt,
            remote_addr,
            if_scope: self.if_scope,
            remote_bgpid: self.remote_bgpid,
            short_as: self.short_as,
            remote_role: self.remote_role,
            capa: self.capa.neg.clone(),
            add_path_any: self.capa.neg.add_path_any(),
        };
        self.stats.last_updown = Some(Instant::now());
        view.bridges.rde(SessionToRde::SessionUp {
            peer_id: self.conf.id,
            data,
        });
    }

    // Announces the terminated session to the RDE.
    fn session_down(&mut self, view: &mut EngineView<'_>) {
        self.capa.neg = Default::default();
        self.stats.last_updown = Some(Instant::now());
        view.bridges.rde(SessionToRde::SessionDown {
            peer_id: self.conf.id,
        });
    }

    // Administratively stops the peer, attaching the configured shutdown
    // reason to the Cease NOTIFICATION where RFC 9003 allows it.
    pub(crate) fn stop(
        &mut self,
        view: &mut EngineView<'_>,
        subcode: CeaseSubcode,
    ) {
        let mut data = vec![];
        if matches!(
            subcode,
            CeaseSubcode::AdministrativeShutdown
                | CeaseSubcode::AdministrativeReset
        ) && let Some(reason) = &self.conf.reason
            && !reason.is_empty()
        {
            if reason.len() > u8::MAX as usize {
                warn_span!("peer", addr = %self.conf.remote_addr).in_scope(
                    || {
                        warn!("trying to send overly long shutdown reason");
                    },
                );
            } else {
                data.push(reason.len() as u8);
                data.extend_from_slice(reason.as_bytes());
            }
        }

        match self.state {
            fsm::State::OpenSent
            | fsm::State::OpenConfirm
            | fsm::State::Established => {
                self.send_notification(
                    view,
                    ErrorCode::Cease,
                    subcode as u8,
                    data,
                );
            }
            _ => {
                // Session not open, no need to send a notification.
            }
        }
        self.fsm_event(view, fsm::Event::Stop);
    }

    // Requests a carp demotion change from the parent.
    pub(crate) fn demote(&mut self, view: &mut EngineView<'_>, level: i32) {
        if let Some(group) = &self.conf.demote_group {
            view.bridges.parent(SessionToParent::Demote {
                group: group.clone(),
                level,
            });
            self.demoted += level;
        }
    }

    // Returns whether an inbound connection may restart this peer right away
    // after a clear.
    pub(crate) fn fast_reconnect(&self) -> bool {
        self.state == fsm::State::Idle
            && self.errcnt < 2
            && self.timers.running(fsm::Timer::IdleHold)
    }
}

// ===== impl Timers =====

impl Timers {
    pub(crate) fn stop(&mut self, timer: fsm::Timer) {
        self.0.remove(&timer);
    }

    pub(crate) fn running(&self, timer: fsm::Timer) -> bool {
        self.0.contains_key(&timer)
    }

    // Drops the handle of a timer that has fired; its message has already
    // been delivered.
    pub(crate) fn expired(&mut self, timer: fsm::Timer) {
        self.0.remove(&timer);
    }
}

// ===== impl MessageCounters =====

impl MessageCounters {
    pub(crate) fn update(&mut self, msg_type: MessageType) {
        match msg_type {
            MessageType::Open => self.open += 1,
            MessageType::Update => self.update += 1,
            MessageType::Notification => self.notification += 1,
            MessageType::Keepalive => self.keepalive += 1,
            MessageType::RouteRefresh => self.rrefresh += 1,
        }
    }
}

// ===== global functions =====

// RFC 9234 role compatibility matrix.
fn role_compatible(local: Option<Role>, remote: Option<Role>) -> bool {
    match local {
        Some(Role::Provider) => remote == Some(Role::Customer),
        Some(Role::RouteServer) => remote == Some(Role::RouteServerClient),
        Some(Role::RouteServerClient) => remote == Some(Role::RouteServer),
        Some(Role::Customer) => remote == Some(Role::Provider),
        Some(Role::Peer) => remote == Some(Role::Peer),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer(ebgp: bool) -> Peer {
        let conf = PeerConfig {
            id: 1,
            group_id: 0,
            descr: "test".to_owned(),
            group: String::new(),
            template: false,
            remote_addr: "192.0.2.2".parse().unwrap(),
            remote_masklen: 32,
            remote_port: 179,
            local_addr_v4: None,
            local_addr_v6: None,
            remote_as: 65002,
            local_as: if ebgp { 65001 } else { 65002 },
            local_short_as: 65001,
            ebgp,
            enforce_as: false,
            distance: 1,
            ttl_security: false,
            passive: false,
            down: false,
            holdtime: 90,
            min_holdtime: 3,
            max_prefix_restart: 0,
            max_out_prefix_restart: 0,
            role: None,
            capabilities: Default::default(),
            announce_capa: true,
            if_depend: None,
            demote_group: None,
            md5_password: None,
            reason: None,
        };
        Peer::new(conf)
    }

    #[test]
    fn role_matrix() {
        use Role::*;
        for (local, remote, ok) in [
            (Provider, Customer, true),
            (Customer, Provider, true),
            (RouteServer, RouteServerClient, true),
            (RouteServerClient, RouteServer, true),
            (Peer, Peer, true),
            (Provider, Provider, false),
            (Provider, Peer, false),
            (Customer, Customer, false),
            (Peer, Provider, false),
        ] {
            assert_eq!(
                role_compatible(Some(local), Some(remote)),
                ok,
                "local {:?} remote {:?}",
                local,
                remote,
            );
        }
        assert!(!role_compatible(None, Some(Provider)));
        assert!(!role_compatible(Some(Provider), None));
    }

    #[test]
    fn negotiate_defaults_to_ipv4_unicast() {
        let mut peer = test_peer(true);
        // Neither side announced any capabilities: the session still covers
        // IPv4 unicast.
        let flushes = peer.capa_neg_calc().unwrap();
        assert!(flushes.is_empty());
        assert!(*peer.capa.neg.mp.get(AfiSafi::Ipv4Unicast));
        assert!(!*peer.capa.neg.mp.get(AfiSafi::Ipv6Unicast));
        assert!(!peer.capa.neg.refresh);
    }

    #[test]
    fn negotiate_intersection() {
        let mut peer = test_peer(true);
        *peer.capa.ann.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        *peer.capa.ann.mp.get_mut(AfiSafi::Ipv6Unicast) = true;
        peer.capa.ann.refresh = true;
        peer.capa.ann.as4byte = true;
        *peer.capa.peer.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        peer.capa.peer.refresh = true;
        peer.capa.peer.enhanced_rr = true;

        peer.capa_neg_calc().unwrap();
        assert!(*peer.capa.neg.mp.get(AfiSafi::Ipv4Unicast));
        assert!(!*peer.capa.neg.mp.get(AfiSafi::Ipv6Unicast));
        assert!(peer.capa.neg.refresh);
        // Enhanced route refresh and 4-octet AS were only announced by one
        // side each.
        assert!(!peer.capa.neg.enhanced_rr);
        assert!(!peer.capa.neg.as4byte);
    }

    #[test]
    fn negotiate_add_path() {
        let mut peer = test_peer(true);
        *peer.capa.ann.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        *peer.capa.peer.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        *peer.capa.ann.add_path.get_mut(AfiSafi::Ipv4Unicast) =
            AddPathFlags::RECV | AddPathFlags::SEND;
        *peer.capa.peer.add_path.get_mut(AfiSafi::Ipv4Unicast) =
            AddPathFlags::SEND;

        peer.capa_neg_calc().unwrap();
        assert_eq!(
            *peer.capa.neg.add_path.get(AfiSafi::Ipv4Unicast),
            AddPathFlags::RECV,
        );
        assert_eq!(peer.capa.neg.add_path_any(), AddPathFlags::RECV);
    }

    #[test]
    fn negotiate_role_mismatch() {
        let mut peer = test_peer(true);
        peer.conf.role = Some(Role::Provider);
        peer.capa.ann.policy = 1;
        peer.capa.peer.policy = 1;
        peer.remote_role = Some(Role::Provider);

        assert_eq!(
            peer.capa_neg_calc(),
            Err(OpenMessageErrorSubcode::RoleMismatch)
        );
    }

    #[test]
    fn negotiate_role_enforced_missing() {
        let mut peer = test_peer(true);
        peer.conf.role = Some(Role::Provider);
        peer.capa.ann.policy = 2;

        assert_eq!(
            peer.capa_neg_calc(),
            Err(OpenMessageErrorSubcode::RoleMismatch)
        );
    }

    #[test]
    fn negotiate_role_ignored_on_ibgp() {
        let mut peer = test_peer(false);
        peer.conf.role = Some(Role::Provider);
        peer.capa.ann.policy = 2;

        assert!(peer.capa_neg_calc().is_ok());
    }

    #[test]
    fn negotiate_gr_restarting_preserved() {
        let mut peer = test_peer(true);
        peer.capa.ann.grestart.restart = 1;
        *peer.capa.ann.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        // The previous session marked IPv4 unicast restarting; the peer
        // still advertises forwarding preservation.
        peer.capa
            .neg
            .grestart
            .flags
            .get_mut(AfiSafi::Ipv4Unicast)
            .insert(GrFlags::RESTARTING);
        *peer.capa.peer.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        peer.capa.peer.grestart.restart = 2;
        peer.capa.peer.grestart.timeout = 120;
        peer.capa
            .peer
            .grestart
            .flags
            .get_mut(AfiSafi::Ipv4Unicast)
            .insert(GrFlags::PRESENT | GrFlags::FORWARD);

        let flushes = peer.capa_neg_calc().unwrap();
        assert!(flushes.is_empty());
        assert!(
            peer.capa
                .neg
                .grestart
                .flags
                .get(AfiSafi::Ipv4Unicast)
                .contains(GrFlags::RESTARTING)
        );
        assert_eq!(peer.capa.neg.grestart.timeout, 120);
    }

    #[test]
    fn negotiate_gr_not_restarted_flushes() {
        let mut peer = test_peer(true);
        peer.capa.ann.grestart.restart = 1;
        *peer.capa.ann.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        peer.capa
            .neg
            .grestart
            .flags
            .get_mut(AfiSafi::Ipv4Unicast)
            .insert(GrFlags::RESTARTING);
        // The reconnected peer no longer advertises graceful restart.
        *peer.capa.peer.mp.get_mut(AfiSafi::Ipv4Unicast) = true;

        let flushes = peer.capa_neg_calc().unwrap();
        assert_eq!(flushes, vec![AfiSafi::Ipv4Unicast]);
        assert!(
            !peer
                .capa
                .neg
                .grestart
                .flags
                .get(AfiSafi::Ipv4Unicast)
                .contains(GrFlags::RESTARTING)
        );
    }

    #[test]
    fn notification_capa_probe() {
        let mut peer = test_peer(true);
        peer.capa.ann.refresh = true;
        let msg = NotificationMsg::new(
            ErrorCode::OpenMessageError,
            OpenMessageErrorSubcode::UnsupportedOptParam,
        );
        assert!(peer.process_notification(&msg));
        assert_eq!(peer.errcnt, 1);
        // The next OPEN goes out without any capabilities.
        assert_eq!(peer.capa.ann, Capabilities::default());
    }

    #[test]
    fn notification_shutdown_reason() {
        let mut peer = test_peer(true);
        let mut data = vec![7];
        data.extend_from_slice(b"goodbye");
        let msg = NotificationMsg::with_data(
            ErrorCode::Cease,
            CeaseSubcode::AdministrativeShutdown,
            data,
        );
        assert!(!peer.process_notification(&msg));
        assert_eq!(peer.stats.last_reason.as_deref(), Some("goodbye"));
    }

    #[tokio::test]
    async fn fsm_decode_error_backoff() {
        use crate::engine::testing::TestContext;
        use crate::packet::error::MessageHeaderError;

        let mut cx = TestContext::new();
        let mut view = cx.view();
        let mut peer = test_peer(true);
        peer.init(&mut view);
        assert_eq!(peer.state, fsm::State::Idle);
        assert_eq!(peer.idle_hold, INTERVAL_IDLE_HOLD_INITIAL);

        // A message with a corrupted marker arrived on an open session.
        peer.state = fsm::State::OpenSent;
        let error = DecodeError::MessageHeader(
            MessageHeaderError::ConnectionNotSynchronized,
        );
        peer.fsm_event(&mut view, fsm::Event::RcvdDecodeError(error));

        // One notification went out, the session dropped to Idle, and the
        // reconnect backoff doubled.
        assert_eq!(peer.state, fsm::State::Idle);
        assert_eq!(peer.errcnt, 1);
        assert_eq!(peer.stats.last_sent_error, Some((1, 1)));
        assert_eq!(peer.idle_hold, 2 * INTERVAL_IDLE_HOLD_INITIAL);
        assert!(peer.timers.running(fsm::Timer::IdleHold));
        assert!(peer.conn.is_none());
    }

    #[tokio::test]
    async fn fsm_holdtime_expiry() {
        use crate::engine::testing::TestContext;

        let mut cx = TestContext::new();
        let mut view = cx.view();
        let mut peer = test_peer(true);
        peer.init(&mut view);
        peer.state = fsm::State::Established;
        peer.holdtime = 30;

        peer.fsm_event(&mut view, fsm::Event::Timer(fsm::Timer::Hold));

        assert_eq!(peer.state, fsm::State::Idle);
        assert_eq!(
            peer.stats.last_sent_error,
            Some((ErrorCode::HoldTimerExpired as u8, 0))
        );
        // The hold time is reset for the next OPEN exchange.
        assert_eq!(peer.holdtime, crate::config::INTERVAL_HOLD_INITIAL);
        assert!(peer.timers.running(fsm::Timer::IdleHold));
    }

    #[tokio::test]
    async fn fsm_stop_without_restart() {
        use crate::engine::testing::TestContext;

        let mut cx = TestContext::new();
        let mut view = cx.view();
        let mut peer = test_peer(true);
        peer.init(&mut view);
        peer.state = fsm::State::Established;

        peer.stop(&mut view, CeaseSubcode::AdministrativeShutdown);

        // An administrative stop must not schedule a reconnect.
        assert_eq!(peer.state, fsm::State::Idle);
        assert_eq!(
            peer.stats.last_sent_error,
            Some((
                ErrorCode::Cease as u8,
                CeaseSubcode::AdministrativeShutdown as u8
            ))
        );
        assert!(!peer.timers.running(fsm::Timer::IdleHold));
    }

    #[tokio::test]
    async fn fsm_established_entry() {
        use crate::engine::testing::TestContext;

        let mut cx = TestContext::new();
        let mut view = cx.view();
        let mut peer = test_peer(true);
        peer.init(&mut view);
        peer.state = fsm::State::OpenConfirm;
        peer.holdtime = 30;

        peer.fsm_event(&mut view, fsm::Event::RcvdKeepalive);

        assert_eq!(peer.state, fsm::State::Established);
        assert!(peer.timers.running(fsm::Timer::Hold));
        assert!(peer.timers.running(fsm::Timer::IdleHoldReset));
        assert!(peer.stats.last_established.is_some());
    }

    #[tokio::test]
    async fn fsm_second_notification_suppressed() {
        use crate::engine::testing::TestContext;

        let mut cx = TestContext::new();
        let mut view = cx.view();
        let mut peer = test_peer(true);
        peer.init(&mut view);
        peer.state = fsm::State::Established;

        peer.send_notification(&mut view, ErrorCode::HoldTimerExpired, 0, vec![]);
        peer.send_notification(
            &mut view,
            ErrorCode::Cease,
            CeaseSubcode::AdministrativeReset as u8,
            vec![],
        );

        // Only the first notification of a session is recorded and sent.
        assert_eq!(
            peer.stats.last_sent_error,
            Some((ErrorCode::HoldTimerExpired as u8, 0))
        );
    }
}
