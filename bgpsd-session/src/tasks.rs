//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use bgpsd_utils::Sender;
use bgpsd_utils::socket::{OwnedReadHalf, OwnedWriteHalf, TcpListener, UnixStream};
use bgpsd_utils::task::{IntervalTask, Task, TimeoutTask};
use bytes::Bytes;
use tracing::{Instrument, debug_span};

use crate::ipc::{self, BridgeMsg};
use crate::network;
use crate::peer::{Peer, fsm};

//
// Session engine tasks diagram:
//
//                                  +--------------+
//                 parent_rx (1x) ->|              |-> (1x) parent_tx
//                    rde_rx (2x) ->|              |-> (2x) rde_tx
//              tcp_listener (Nx) ->|              |
//               tcp_connect (Nx) ->|    engine    |
//                   peer_rx (Nx) ->|              |-> (Nx) peer_tx
//                peer_timer (Nx) ->|              |-> (Nx) mrt writer
//                      tick (1x) ->|              |
//                                  +--------------+
//

// Engine input message types.
pub mod messages {
    use std::os::fd::OwnedFd;

    use bgpsd_utils::socket::{TcpConnInfo, TcpStream};
    use bytes::Bytes;

    use crate::error::{IoError, RxError};
    use crate::ipc::{ParentToSession, RdeToSession};
    use crate::packet::message::Message;
    use crate::peer::fsm;

    // Messages received by the engine loop.
    #[derive(Debug)]
    pub enum EngineMsg {
        ParentRx(ParentRxMsg),
        RdeRx(RdeRxMsg),
        TcpAccept(TcpAcceptMsg),
        TcpConnect(TcpConnectMsg),
        PeerRx(PeerRxMsg),
        PeerTx(PeerTxMsg),
        PeerTimer(PeerTimerMsg),
        Tick,
    }

    #[derive(Debug)]
    pub enum ParentRxMsg {
        Msg(ParentToSession, Option<OwnedFd>),
        Closed,
    }

    #[derive(Debug)]
    pub enum RdeRxMsg {
        Msg { ctl: bool, msg: RdeToSession },
        Closed { ctl: bool },
    }

    #[derive(Debug)]
    pub struct TcpAcceptMsg {
        pub stream: TcpStream,
        pub conn_info: TcpConnInfo,
    }

    #[derive(Debug)]
    pub struct TcpConnectMsg {
        pub peer_id: u32,
        pub result: Result<(TcpStream, TcpConnInfo), IoError>,
    }

    #[derive(Debug)]
    pub struct PeerRxMsg {
        pub peer_id: u32,
        pub msg: Result<(Message, Bytes), RxError>,
    }

    #[derive(Debug)]
    pub struct PeerTxMsg {
        pub peer_id: u32,
        pub event: TxEvent,
    }

    #[derive(Debug)]
    pub enum TxEvent {
        // Forward progress; `queued` is what is still buffered.
        Progress { queued: usize },
        Error(String),
    }

    #[derive(Debug)]
    pub struct PeerTimerMsg {
        pub peer_id: u32,
        pub timer: fsm::Timer,
    }
}

// ===== session engine tasks =====

// TCP listening task.
pub(crate) fn tcp_listener(
    listener: &Arc<TcpListener>,
    tcp_acceptp: &Sender<messages::TcpAcceptMsg>,
) -> Task<()> {
    let span = debug_span!("listener");
    let _span_guard = span.enter();

    let listener = listener.clone();
    let tcp_acceptp = tcp_acceptp.clone();
    Task::spawn(
        async move {
            let _ = network::listen_loop(listener, tcp_acceptp).await;
        }
        .in_current_span(),
    )
}

// TCP connect task. A single connection attempt whose outcome feeds the
// peer's FSM.
pub(crate) fn tcp_connect(
    peer: &Peer,
    tcp_connectp: &Sender<messages::TcpConnectMsg>,
) -> Task<()> {
    let span = debug_span!("peer", addr = %peer.conf.remote_addr);
    let _span_guard = span.enter();

    let peer_id = peer.conf.id;
    let conf = peer.conf.clone();
    let tcp_connectp = tcp_connectp.clone();
    Task::spawn(
        async move {
            let result = network::connect(&conf).await;
            let msg = messages::TcpConnectMsg { peer_id, result };
            let _ = tcp_connectp.send(msg).await;
        }
        .in_current_span(),
    )
}

// Peer TCP Rx task: reads the socket into a fixed-size buffer and pumps
// complete messages to the engine.
pub(crate) fn peer_rx(
    peer: &Peer,
    read_half: OwnedReadHalf,
    peer_rxp: &Sender<messages::PeerRxMsg>,
) -> Task<()> {
    let span1 = debug_span!("peer", addr = %peer.conf.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let peer_id = peer.conf.id;
    let peer_rxp = peer_rxp.clone();
    Task::spawn(
        async move {
            let _ =
                network::peer_read_loop(read_half, peer_id, peer_rxp).await;
        }
        .in_current_span(),
    )
}

// Peer TCP Tx task: writes queued messages and reports forward progress for
// send-hold supervision and back-pressure accounting.
pub(crate) fn peer_tx(
    peer: &Peer,
    write_half: OwnedWriteHalf,
    msg_txc: bgpsd_utils::UnboundedReceiver<Bytes>,
    queued: Arc<AtomicUsize>,
    peer_txp: &Sender<messages::PeerTxMsg>,
) -> Task<()> {
    let span1 = debug_span!("peer", addr = %peer.conf.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    let peer_id = peer.conf.id;
    let peer_txp = peer_txp.clone();
    Task::spawn(
        async move {
            network::peer_write_loop(
                write_half, msg_txc, queued, peer_id, peer_txp,
            )
            .await;
        }
        .in_current_span(),
    )
}

// Peer timer task.
pub(crate) fn peer_timer(
    peer_id: u32,
    timer: fsm::Timer,
    seconds: u64,
    peer_timerp: &Sender<messages::PeerTimerMsg>,
) -> TimeoutTask {
    let peer_timerp = peer_timerp.clone();

    TimeoutTask::new(Duration::from_secs(seconds), move || async move {
        let msg = messages::PeerTimerMsg { peer_id, timer };
        let _ = peer_timerp.send(msg).await;
    })
}

// Coarse housekeeping tick driving peer initialization and reaping.
pub(crate) fn tick(tickp: &Sender<()>) -> IntervalTask {
    let tickp = tickp.clone();

    IntervalTask::new(Duration::from_secs(10), false, move || {
        let tickp = tickp.clone();
        async move {
            let _ = tickp.try_send(());
        }
    })
}

// Bridge reader task: decodes frames from the parent or RDE pipe and wraps
// them into engine messages; a final marker signals the closed pipe.
pub(crate) fn bridge_rx<M, T, W, C>(
    name: &'static str,
    stream: Arc<UnixStream>,
    msgp: Sender<T>,
    wrap: W,
    closed: C,
) -> Task<()>
where
    M: BridgeMsg,
    T: Send + 'static,
    W: Fn(M, Option<std::os::fd::OwnedFd>) -> T + Send + 'static,
    C: FnOnce() -> T + Send + 'static,
{
    let span1 = debug_span!("bridge", %name);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            if let Err(error) =
                ipc::read_loop(stream, msgp.clone(), wrap).await
            {
                tracing::warn!(%error, "bridge read error");
            }
            let _ = msgp.send(closed()).await;
        }
        .in_current_span(),
    )
}

// Bridge writer task.
pub(crate) fn bridge_tx<M: BridgeMsg>(
    name: &'static str,
    stream: Arc<UnixStream>,
    msgc: bgpsd_utils::UnboundedReceiver<M>,
) -> Task<()> {
    let span1 = debug_span!("bridge", %name);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            if let Err(error) = ipc::write_loop(stream, msgc).await {
                tracing::warn!(%error, "bridge write error");
            }
        }
        .in_current_span(),
    )
}
