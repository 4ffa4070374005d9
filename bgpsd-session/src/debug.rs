//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{debug, debug_span};

use crate::ipc::{ParentToSession, RdeToSession, SessionToRde};
use crate::packet::message::Message;
use crate::peer::fsm;

// Session engine debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    EngineStart,
    EngineShutdown,
    ListenerStart(&'a std::net::SocketAddr),
    ListenerDelete(&'a std::net::SocketAddr),
    PeerFsmEvent(&'a IpAddr, &'a fsm::Event),
    PeerFsmTransition(&'a IpAddr, fsm::State, fsm::State),
    PeerMsgRx(&'a IpAddr, &'a Message),
    PeerMsgTx(&'a IpAddr, &'a Message),
    ParentMsgRx(&'a ParentToSession),
    RdeMsgRx(&'a RdeToSession),
    RdeMsgTx(&'a SessionToRde),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::EngineStart | Debug::EngineShutdown => {
                debug!("{}", self);
            }
            Debug::ListenerStart(addr) | Debug::ListenerDelete(addr) => {
                debug!(%addr, "{}", self);
            }
            Debug::PeerFsmEvent(addr, event) => {
                debug_span!("peer", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    })
                });
            }
            Debug::PeerFsmTransition(addr, old_state, new_state) => {
                debug_span!("peer", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                });
            }
            Debug::PeerMsgRx(addr, msg) => {
                debug_span!("peer", %addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::PeerMsgTx(addr, msg) => {
                debug_span!("peer", %addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::ParentMsgRx(msg) => {
                debug_span!("parent").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(msg = ?msg, "{}", self);
                    })
                });
            }
            Debug::RdeMsgRx(msg) => {
                debug_span!("rde").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(msg = ?msg, "{}", self);
                    })
                });
            }
            Debug::RdeMsgTx(msg) => {
                debug_span!("rde").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(msg = ?msg, "{}", self);
                    })
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::EngineStart => {
                write!(f, "session engine ready")
            }
            Debug::EngineShutdown => {
                write!(f, "session engine exiting")
            }
            Debug::ListenerStart(..) => {
                write!(f, "listening")
            }
            Debug::ListenerDelete(..) => {
                write!(f, "not listening any more")
            }
            Debug::PeerFsmEvent(..) => {
                write!(f, "event")
            }
            Debug::PeerFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::PeerMsgRx(..) | Debug::PeerMsgTx(..) => {
                write!(f, "message")
            }
            Debug::ParentMsgRx(..)
            | Debug::RdeMsgRx(..)
            | Debug::RdeMsgTx(..) => {
                write!(f, "message")
            }
        }
    }
}
