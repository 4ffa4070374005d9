//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use bgpsd_utils::ip::IpAddrExt;
use bgpsd_utils::socket::{TcpListener, TcpListenerExt};
use bgpsd_utils::task::{IntervalTask, Task};
use bgpsd_utils::{Receiver, Sender, UnboundedSender};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{
    INTERVAL_HOLD_CLONED, ListenerCfg, ReconfAction, SessionCfg,
};
use crate::debug::Debug;
use crate::error::IoError;
use crate::events;
use crate::ipc::{
    self, ParentToSession, RdeToSession, SessionToParent, SessionToRde,
};
use crate::mrt::MrtSinks;
use crate::network;
use crate::packet::consts::CeaseSubcode;
use crate::peer::{Peer, Peers, fsm};
use crate::tasks;
use crate::tasks::messages::{
    EngineMsg, ParentRxMsg, PeerRxMsg, PeerTimerMsg, PeerTxMsg, RdeRxMsg,
    TcpAcceptMsg, TcpConnectMsg,
};

//
// The session engine: the single owner of all peers, listeners, dump
// targets, and bridge pipes. All I/O helper tasks funnel their results into
// the engine loop over the channels below; no state is shared.
//
#[derive(Debug)]
pub struct Engine {
    pub conf: SessionCfg,
    pub peers: Peers,
    pub listeners: Vec<Listener>,
    pub mrts: MrtSinks,
    pub bridges: Bridges,
    // Staged configuration during a reload.
    nconf: Option<PendingConfig>,
    // Control sockets received from the parent. Serving the control
    // protocol is the job of another process; the descriptors are merely
    // kept open here.
    csock: Option<OwnedFd>,
    rcsock: Option<OwnedFd>,
    quit: bool,
    tx: EngineChannelsTx,
    rx: EngineChannelsRx,
    _tick_task: IntervalTask,
}

// A listening socket with its accept task.
#[derive(Debug)]
pub struct Listener {
    pub cfg: ListenerCfg,
    pub socket: Arc<TcpListener>,
    _task: Task<()>,
}

// Configuration staged by the RECONF_* message sequence, applied atomically
// at RECONF_DONE.
#[derive(Debug)]
struct PendingConfig {
    conf: SessionCfg,
    peers: Peers,
    listeners: Vec<(ListenerCfg, Option<OwnedFd>)>,
}

// Writer sides of the parent and RDE pipes.
#[derive(Debug)]
pub struct Bridges {
    parent: BridgeHandle<SessionToParent>,
    rde: Option<BridgeHandle<SessionToRde>>,
    rde_ctl: Option<BridgeHandle<SessionToRde>>,
}

#[derive(Debug)]
struct BridgeHandle<M> {
    txp: UnboundedSender<M>,
    _rx_task: Task<()>,
    _tx_task: Task<()>,
}

// Senders for the engine input channels, handed to every helper task.
#[derive(Clone, Debug)]
pub struct EngineChannelsTx {
    pub tcp_accept: Sender<TcpAcceptMsg>,
    pub tcp_connect: Sender<TcpConnectMsg>,
    pub peer_rx: Sender<PeerRxMsg>,
    pub peer_tx: Sender<PeerTxMsg>,
    pub peer_timer: Sender<PeerTimerMsg>,
    pub parent_rx: Sender<ParentRxMsg>,
    pub rde_rx: Sender<RdeRxMsg>,
    pub tick: Sender<()>,
}

#[derive(Debug)]
struct EngineChannelsRx {
    tcp_accept: Receiver<TcpAcceptMsg>,
    tcp_connect: Receiver<TcpConnectMsg>,
    peer_rx: Receiver<PeerRxMsg>,
    peer_tx: Receiver<PeerTxMsg>,
    peer_timer: Receiver<PeerTimerMsg>,
    parent_rx: Receiver<ParentRxMsg>,
    rde_rx: Receiver<RdeRxMsg>,
    tick: Receiver<()>,
}

// Borrowed view of the engine handed into the event handlers next to the
// peer table, so that peers and the rest of the engine state can be mutated
// independently.
pub struct EngineView<'a> {
    pub conf: &'a SessionCfg,
    pub tx: &'a EngineChannelsTx,
    pub bridges: &'a Bridges,
    pub mrts: &'a mut MrtSinks,
}

// ===== impl Engine =====

impl Engine {
    // Creates the engine around the already-open pipe to the parent process.
    pub fn new(parent: OwnedFd) -> std::io::Result<Engine> {
        let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
        let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
        let (peer_rxp, peer_rxc) = mpsc::channel(4);
        let (peer_txp, peer_txc) = mpsc::channel(4);
        let (peer_timerp, peer_timerc) = mpsc::channel(4);
        let (parent_rxp, parent_rxc) = mpsc::channel(4);
        let (rde_rxp, rde_rxc) = mpsc::channel(4);
        let (tickp, tickc) = mpsc::channel(1);

        let tx = EngineChannelsTx {
            tcp_accept: tcp_acceptp,
            tcp_connect: tcp_connectp,
            peer_rx: peer_rxp,
            peer_tx: peer_txp,
            peer_timer: peer_timerp,
            parent_rx: parent_rxp,
            rde_rx: rde_rxp,
            tick: tickp,
        };
        let rx = EngineChannelsRx {
            tcp_accept: tcp_acceptc,
            tcp_connect: tcp_connectc,
            peer_rx: peer_rxc,
            peer_tx: peer_txc,
            peer_timer: peer_timerc,
            parent_rx: parent_rxc,
            rde_rx: rde_rxc,
            tick: tickc,
        };

        // Connect the parent bridge.
        let stream = Arc::new(ipc::stream_from_fd(parent)?);
        let (parent_txp, parent_txc) = mpsc::unbounded_channel();
        let rx_task = tasks::bridge_rx::<ParentToSession, _, _, _>(
            "parent",
            stream.clone(),
            tx.parent_rx.clone(),
            ParentRxMsg::Msg,
            || ParentRxMsg::Closed,
        );
        let tx_task = tasks::bridge_tx("parent", stream, parent_txc);
        let bridges = Bridges {
            parent: BridgeHandle {
                txp: parent_txp,
                _rx_task: rx_task,
                _tx_task: tx_task,
            },
            rde: None,
            rde_ctl: None,
        };

        let tick_task = tasks::tick(&tx.tick);

        Ok(Engine {
            conf: Default::default(),
            peers: Default::default(),
            listeners: Default::default(),
            mrts: Default::default(),
            bridges,
            nconf: None,
            csock: None,
            rcsock: None,
            quit: false,
            tx,
            rx,
            _tick_task: tick_task,
        })
    }

    // Runs the engine until a termination signal arrives or the parent pipe
    // goes away.
    pub async fn run(mut self) {
        Debug::EngineStart.log();

        let mut sigint = signal(SignalKind::interrupt())
            .expect("failed to register SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        while !self.quit {
            let msg = tokio::select! {
                biased;
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.process_msg(msg);
        }

        self.shutdown().await;
    }

    fn process_msg(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::ParentRx(msg) => {
                self.process_parent_msg(msg);
            }
            EngineMsg::RdeRx(msg) => {
                self.process_rde_msg(msg);
            }
            EngineMsg::TcpAccept(msg) => {
                let (mut view, peers) = self.view();
                events::process_tcp_accept(
                    &mut view,
                    peers,
                    msg.stream,
                    msg.conn_info,
                );
            }
            EngineMsg::TcpConnect(msg) => {
                let (mut view, peers) = self.view();
                events::process_tcp_connect(&mut view, peers, msg);
            }
            EngineMsg::PeerRx(msg) => {
                let (mut view, peers) = self.view();
                events::process_peer_msg(&mut view, peers, msg);
            }
            EngineMsg::PeerTx(msg) => {
                let (mut view, peers) = self.view();
                events::process_peer_tx(&mut view, peers, msg);
            }
            EngineMsg::PeerTimer(msg) => {
                let (mut view, peers) = self.view();
                events::process_peer_timer(&mut view, peers, msg);
            }
            EngineMsg::Tick => {
                self.housekeeping();
            }
        }
    }

    fn view(&mut self) -> (EngineView<'_>, &mut Peers) {
        let view = EngineView {
            conf: &self.conf,
            tx: &self.tx,
            bridges: &self.bridges,
            mrts: &mut self.mrts,
        };
        (view, &mut self.peers)
    }

    // ===== parent bridge =====

    fn process_parent_msg(&mut self, msg: ParentRxMsg) {
        let ParentRxMsg::Msg(msg, fd) = msg else {
            warn!("lost connection to parent");
            self.quit = true;
            return;
        };
        Debug::ParentMsgRx(&msg).log();

        match msg {
            ParentToSession::SocketConn => {
                self.setup_rde_pipe(fd, false);
            }
            ParentToSession::SocketConnCtl => {
                self.setup_rde_pipe(fd, true);
            }
            ParentToSession::ReconfConf(conf) => {
                for listener in &mut self.listeners {
                    listener.cfg.reconf = ReconfAction::None;
                }
                self.nconf = Some(PendingConfig {
                    conf,
                    peers: Default::default(),
                    listeners: Default::default(),
                });
            }
            ParentToSession::ReconfPeer(pconf) => {
                let Some(nconf) = &mut self.nconf else {
                    panic!("got RECONF_PEER but no config");
                };
                let mut peer = Peer::new(pconf);
                peer.reconf_action = ReconfAction::Reinit;
                nconf.peers.insert(peer.conf.id, peer);
            }
            ParentToSession::ReconfListener(lcfg) => {
                let Some(nconf) = &mut self.nconf else {
                    panic!("got RECONF_LISTENER but no config");
                };
                match self
                    .listeners
                    .iter_mut()
                    .find(|listener| listener.cfg.addr == lcfg.addr)
                {
                    Some(listener) => {
                        assert!(
                            lcfg.reconf == ReconfAction::Keep,
                            "expected RECONF_KEEP"
                        );
                        listener.cfg.reconf = ReconfAction::Keep;
                    }
                    None => {
                        assert!(
                            lcfg.reconf == ReconfAction::Reinit,
                            "expected RECONF_REINIT"
                        );
                        if fd.is_none() {
                            warn!(
                                addr = %lcfg.addr,
                                "expected to receive fd for listener",
                            );
                        }
                        nconf.listeners.push((lcfg, fd));
                    }
                }
            }
            ParentToSession::ReconfCtrl { restricted } => {
                let Some(fd) = fd else {
                    warn!("expected to receive fd for control socket");
                    return;
                };
                if restricted {
                    self.rcsock = Some(fd);
                } else {
                    self.csock = Some(fd);
                }
            }
            ParentToSession::ReconfDrain => {
                assert!(
                    self.nconf.is_some(),
                    "got RECONF_DRAIN from parent but no config"
                );
                self.bridges.parent(SessionToParent::ReconfDrain);
            }
            ParentToSession::ReconfDone => {
                self.reconf_done();
            }
            ParentToSession::SessionDependon {
                ifname,
                depend_state,
            } => {
                let (mut view, peers) = self.view();
                events::process_dependon(
                    &mut view,
                    peers,
                    &ifname,
                    depend_state,
                );
            }
            ParentToSession::MrtOpen(conf)
            | ParentToSession::MrtReopen(conf) => {
                let Some(fd) = fd else {
                    warn!("expected to receive fd for mrt dump");
                    return;
                };
                self.mrts.open(conf, fd);
            }
            ParentToSession::MrtClose(conf) => {
                self.mrts.close(&conf);
            }
        }
    }

    fn setup_rde_pipe(&mut self, fd: Option<OwnedFd>, ctl: bool) {
        let Some(fd) = fd else {
            warn!("expected to receive fd for the RDE pipe");
            return;
        };
        let stream = match ipc::stream_from_fd(fd) {
            Ok(stream) => Arc::new(stream),
            Err(error) => {
                IoError::PipeError(error).log();
                return;
            }
        };

        let name = if ctl { "rde-ctl" } else { "rde" };
        let (txp, txc) = mpsc::unbounded_channel();
        let rx_task = tasks::bridge_rx::<RdeToSession, _, _, _>(
            name,
            stream.clone(),
            self.tx.rde_rx.clone(),
            move |msg, _| RdeRxMsg::Msg { ctl, msg },
            move || RdeRxMsg::Closed { ctl },
        );
        let tx_task = tasks::bridge_tx(name, stream, txc);
        let handle = BridgeHandle {
            txp,
            _rx_task: rx_task,
            _tx_task: tx_task,
        };

        let slot = if ctl {
            &mut self.bridges.rde_ctl
        } else {
            &mut self.bridges.rde
        };
        if slot.is_some() {
            warn!(%name, "unexpected pipe received, replacing");
        }
        *slot = Some(handle);
    }

    // ===== RDE bridge =====

    fn process_rde_msg(&mut self, msg: RdeRxMsg) {
        match msg {
            RdeRxMsg::Closed { ctl } => {
                warn!(%ctl, "lost connection to RDE");
                if ctl {
                    self.bridges.rde_ctl = None;
                } else {
                    self.bridges.rde = None;
                }
            }
            RdeRxMsg::Msg { ctl: true, msg } => {
                // Control relay traffic; answering neighbor queries is the
                // control process's business, not ours.
                Debug::RdeMsgRx(&msg).log();
            }
            RdeRxMsg::Msg {
                ctl: false,
                msg: RdeToSession::ReconfDrain,
            } => {
                // The RDE drained the peer configs sent during the reload.
                assert!(
                    self.nconf.is_none(),
                    "got RECONF_DRAIN from RDE during reload"
                );
                self.bridges.parent(SessionToParent::ReconfDone);
            }
            RdeRxMsg::Msg { ctl: false, msg } => {
                let (mut view, peers) = self.view();
                events::process_rde_msg(&mut view, peers, msg);
            }
        }
    }

    // ===== staged reload =====

    fn reconf_done(&mut self) {
        let Some(nconf) = self.nconf.take() else {
            panic!("got RECONF_DONE but no config");
        };

        self.conf = nconf.conf;
        self.merge_peers(nconf.peers);

        // Delete the listeners the new configuration no longer has.
        self.listeners.retain(|listener| {
            if listener.cfg.reconf == ReconfAction::None {
                Debug::ListenerDelete(&listener.cfg.addr).log();
                false
            } else {
                true
            }
        });

        // Add the new ones.
        for (cfg, fd) in nconf.listeners {
            let Some(fd) = fd else {
                continue;
            };
            match network::listener_from_fd(fd, cfg.addr.ip().address_family())
            {
                Ok(socket) => {
                    let socket = Arc::new(socket);
                    let task = tasks::tcp_listener(&socket, &self.tx.tcp_accept);
                    Debug::ListenerStart(&cfg.addr).log();
                    self.listeners.push(Listener {
                        cfg,
                        socket,
                        _task: task,
                    });
                }
                Err(error) => {
                    IoError::ListenerError(error).log();
                }
            }
        }

        self.md5_listener_sync();
        info!("session engine reconfigured");

        // Bring the new peers up right away instead of waiting for the next
        // tick.
        self.housekeeping();
    }

    fn merge_peers(&mut self, mut npeers: Peers) {
        let (mut view, peers) = {
            let view = EngineView {
                conf: &self.conf,
                tx: &self.tx,
                bridges: &self.bridges,
                mrts: &mut self.mrts,
            };
            (view, &mut self.peers)
        };

        let ids = peers.keys().copied().collect::<Vec<_>>();
        for id in ids {
            let npeer = npeers.remove(&id);
            let peer = peers.get_mut(&id).unwrap();

            // Clones inherit whatever happens to their template below.
            if peer.template_id.is_some() {
                continue;
            }

            let Some(npeer) = npeer else {
                peer.reconf_action = ReconfAction::Delete;
                continue;
            };

            peer.conf = npeer.conf;
            peer.reconf_action = ReconfAction::Keep;

            // Had demotion, is demoted, demote removed?
            if peer.demoted > 0 && peer.conf.demote_group.is_none() {
                peer.demote(&mut view, -1);
            }

            // If the session is not open then refresh the keying material.
            if peer.state < fsm::State::OpenSent {
                view.bridges.parent(SessionToParent::PfkeyReload {
                    peer_id: id,
                });
            }

            // Sync the RDE in case we keep the peer.
            view.bridges
                .rde(SessionToRde::SessionAdd(peer.conf.clone()));

            // Apply the config to all clones of a template.
            if peer.conf.template {
                let tconf = peer.conf.clone();
                let clone_ids = peers
                    .values()
                    .filter(|peer| peer.template_id == Some(id))
                    .map(|peer| {
                        (
                            peer.conf.id,
                            peer.conf.remote_addr,
                            peer.conf.remote_as,
                        )
                    })
                    .collect::<Vec<_>>();
                for (clone_id, remote_addr, remote_as) in clone_ids {
                    let clone = peers.get_mut(&clone_id).unwrap();
                    clone.conf = events::clone_config(
                        &tconf,
                        clone_id,
                        remote_addr,
                        remote_as,
                    );
                    view.bridges
                        .rde(SessionToRde::SessionAdd(clone.conf.clone()));
                }
            }
        }

        // Move the peers the running config did not have yet; they get
        // initialized by the next housekeeping pass.
        for (id, npeer) in npeers {
            peers.insert(id, npeer);
        }

        view.bridges.rde(SessionToRde::ReconfDrain);
    }

    // Installs the TCP MD5 keys of all configured peers on every listening
    // socket.
    fn md5_listener_sync(&self) {
        for listener in &self.listeners {
            for peer in self
                .peers
                .values()
                .filter(|peer| !peer.conf.template)
            {
                if let Some(password) = &peer.conf.md5_password
                    && let Err(error) = listener
                        .socket
                        .set_md5sig(&peer.conf.remote_addr, Some(password))
                {
                    IoError::TcpAuthError(error).log();
                }
            }
        }
    }

    // ===== housekeeping =====

    // Initializes new peers and reaps deleted ones, plus clones that idled
    // out. Suppressed while a reload is staged.
    fn housekeeping(&mut self) {
        if self.nconf.is_some() {
            return;
        }

        let now = Instant::now();
        let mut deleted = Vec::new();
        {
            let (mut view, peers) = {
                let view = EngineView {
                    conf: &self.conf,
                    tx: &self.tx,
                    bridges: &self.bridges,
                    mrts: &mut self.mrts,
                };
                (view, &mut self.peers)
            };

            let ids = peers.keys().copied().collect::<Vec<_>>();
            for id in ids {
                let peer = peers.get_mut(&id).unwrap();

                // Cloned peer that idled out?
                if peer.template_id.is_some()
                    && matches!(
                        peer.state,
                        fsm::State::Idle | fsm::State::Active
                    )
                    && let Some(last_updown) = peer.stats.last_updown
                    && now.duration_since(last_updown)
                        >= Duration::from_secs(INTERVAL_HOLD_CLONED)
                {
                    peer.reconf_action = ReconfAction::Delete;
                }

                // New peer that needs init?
                if peer.state == fsm::State::None {
                    peer.init(&mut view);
                }

                // Deletion due?
                if peer.reconf_action == ReconfAction::Delete {
                    if peer.demoted > 0 {
                        peer.demote(&mut view, -1);
                    }
                    peer.conf.demote_group = None;
                    peer.stop(&mut view, CeaseSubcode::PeerDeConfigured);
                    warn!(addr = %peer.conf.remote_addr, "peer removed");
                    deleted.push((
                        id,
                        peer.conf.remote_addr,
                        peer.conf.md5_password.is_some(),
                    ));
                    continue;
                }
                peer.reconf_action = ReconfAction::None;
            }
        }

        for (id, remote_addr, had_md5) in deleted {
            self.peers.remove(&id);
            if had_md5 {
                for listener in &self.listeners {
                    let _ = listener.socket.set_md5sig(&remote_addr, None);
                }
            }
        }
    }

    // ===== shutdown =====

    async fn shutdown(mut self) {
        {
            let (mut view, peers) = {
                let view = EngineView {
                    conf: &self.conf,
                    tx: &self.tx,
                    bridges: &self.bridges,
                    mrts: &mut self.mrts,
                };
                (view, &mut self.peers)
            };
            let ids = peers.keys().copied().collect::<Vec<_>>();
            for id in ids {
                let peer = peers.get_mut(&id).unwrap();
                peer.conf.reason = Some("bgpd shutting down".to_owned());
                peer.stop(&mut view, CeaseSubcode::AdministrativeShutdown);
            }
        }

        // Dropping the peers closes their transmit queues; the detached
        // transmit tasks flush what is buffered. Give them a moment before
        // the runtime goes away.
        self.peers.clear();
        tokio::time::sleep(Duration::from_millis(200)).await;

        Debug::EngineShutdown.log();
    }
}

// ===== impl EngineChannelsRx =====

impl EngineChannelsRx {
    // Receives the next engine input, draining the bridge pipes ahead of
    // connection and peer events and those ahead of timers.
    async fn recv(&mut self) -> Option<EngineMsg> {
        tokio::select! {
            biased;
            msg = self.parent_rx.recv() => {
                msg.map(EngineMsg::ParentRx)
            }
            msg = self.rde_rx.recv() => {
                msg.map(EngineMsg::RdeRx)
            }
            msg = self.tcp_accept.recv() => {
                msg.map(EngineMsg::TcpAccept)
            }
            msg = self.tcp_connect.recv() => {
                msg.map(EngineMsg::TcpConnect)
            }
            msg = self.peer_rx.recv() => {
                msg.map(EngineMsg::PeerRx)
            }
            msg = self.peer_tx.recv() => {
                msg.map(EngineMsg::PeerTx)
            }
            msg = self.peer_timer.recv() => {
                msg.map(EngineMsg::PeerTimer)
            }
            msg = self.tick.recv() => {
                msg.map(|_| EngineMsg::Tick)
            }
        }
    }
}

// ===== impl Bridges =====

impl Bridges {
    // Sends a message to the parent process.
    pub(crate) fn parent(&self, msg: SessionToParent) {
        let _ = self.parent.txp.send(msg);
    }

    // Sends a message to the RDE, dropping it if the pipe is not connected.
    pub(crate) fn rde(&self, msg: SessionToRde) {
        Debug::RdeMsgTx(&msg).log();
        if let Some(rde) = &self.rde {
            let _ = rde.txp.send(msg);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    // Minimal engine surroundings for driving a peer FSM in unit tests.
    pub(crate) struct TestContext {
        pub(crate) conf: SessionCfg,
        pub(crate) tx: EngineChannelsTx,
        pub(crate) bridges: Bridges,
        pub(crate) mrts: MrtSinks,
        _rx: EngineChannelsRx,
    }

    impl TestContext {
        pub(crate) fn new() -> TestContext {
            let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
            let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
            let (peer_rxp, peer_rxc) = mpsc::channel(4);
            let (peer_txp, peer_txc) = mpsc::channel(4);
            let (peer_timerp, peer_timerc) = mpsc::channel(4);
            let (parent_rxp, parent_rxc) = mpsc::channel(4);
            let (rde_rxp, rde_rxc) = mpsc::channel(4);
            let (tickp, tickc) = mpsc::channel(1);
            let (parent_txp, _) = mpsc::unbounded_channel();

            TestContext {
                conf: Default::default(),
                tx: EngineChannelsTx {
                    tcp_accept: tcp_acceptp,
                    tcp_connect: tcp_connectp,
                    peer_rx: peer_rxp,
                    peer_tx: peer_txp,
                    peer_timer: peer_timerp,
                    parent_rx: parent_rxp,
                    rde_rx: rde_rxp,
                    tick: tickp,
                },
                bridges: Bridges {
                    parent: BridgeHandle {
                        txp: parent_txp,
                        _rx_task: Task::spawn(async {}),
                        _tx_task: Task::spawn(async {}),
                    },
                    rde: None,
                    rde_ctl: None,
                },
                mrts: Default::default(),
                _rx: EngineChannelsRx {
                    tcp_accept: tcp_acceptc,
                    tcp_connect: tcp_connectc,
                    peer_rx: peer_rxc,
                    peer_tx: peer_txc,
                    peer_timer: peer_timerc,
                    parent_rx: parent_rxc,
                    rde_rx: rde_rxc,
                    tick: tickc,
                },
            }
        }

        pub(crate) fn view(&mut self) -> EngineView<'_> {
            EngineView {
                conf: &self.conf,
                tx: &self.tx,
                bridges: &self.bridges,
                mrts: &mut self.mrts,
            }
        }
    }
}
