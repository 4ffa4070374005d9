//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};
use tracing::{warn, warn_span};

use crate::packet::error::DecodeError;

// Session engine errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Network input
    PeerRxError(IpAddr, RxError),
    // OPEN message processing
    PeerBadAs(IpAddr, u32, u32),
    PeerBadIdentifier(IpAddr, Ipv4Addr),
    PeerBadHoldTime(IpAddr, u16),
}

// Session engine I/O errors.
#[derive(Debug)]
pub enum IoError {
    ListenerError(std::io::Error),
    TcpSocketError(std::io::Error),
    TcpAcceptError(std::io::Error),
    TcpConnectError(std::io::Error),
    TcpInfoError(std::io::Error),
    TcpAuthError(std::io::Error),
    PipeError(std::io::Error),
}

// Errors delivered by a peer's receive task.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum RxError {
    ConnClosed,
    ConnError(String),
    MsgDecodeError(DecodeError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::PeerRxError(addr, error) => {
                warn_span!("peer", %addr).in_scope(|| {
                    error.log();
                });
            }
            Error::PeerBadAs(addr, received, expected) => {
                warn_span!("peer", %addr).in_scope(|| {
                    warn!(%received, %expected, "{}", self);
                });
            }
            Error::PeerBadIdentifier(addr, identifier) => {
                warn_span!("peer", %addr).in_scope(|| {
                    warn!(%identifier, "{}", self);
                });
            }
            Error::PeerBadHoldTime(addr, holdtime) => {
                warn_span!("peer", %addr).in_scope(|| {
                    warn!(%holdtime, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::PeerRxError(_, error) => error.fmt(f),
            Error::PeerBadAs(..) => {
                write!(f, "peer sent wrong AS")
            }
            Error::PeerBadIdentifier(..) => {
                write!(f, "BGP identifier conflict")
            }
            Error::PeerBadHoldTime(..) => {
                write!(f, "peer requests unacceptable holdtime")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PeerRxError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::ListenerError(error)
            | IoError::TcpSocketError(error)
            | IoError::TcpAcceptError(error)
            | IoError::TcpConnectError(error)
            | IoError::TcpInfoError(error)
            | IoError::TcpAuthError(error)
            | IoError::PipeError(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::ListenerError(..) => {
                write!(f, "failed to set up listening socket")
            }
            IoError::TcpSocketError(..) => {
                write!(f, "failed to create TCP socket")
            }
            IoError::TcpAcceptError(..) => {
                write!(f, "failed to accept connection request")
            }
            IoError::TcpConnectError(..) => {
                write!(f, "failed to establish TCP connection")
            }
            IoError::TcpInfoError(..) => {
                write!(
                    f,
                    "failed to fetch address and port information from the socket"
                )
            }
            IoError::TcpAuthError(..) => {
                write!(f, "failed to set TCP authentication option")
            }
            IoError::PipeError(..) => {
                write!(f, "failed to exchange messages over the ipc pipe")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::ListenerError(error)
            | IoError::TcpSocketError(error)
            | IoError::TcpAcceptError(error)
            | IoError::TcpConnectError(error)
            | IoError::TcpInfoError(error)
            | IoError::TcpAuthError(error)
            | IoError::PipeError(error) => Some(error),
        }
    }
}

// ===== impl RxError =====

impl RxError {
    pub(crate) fn log(&self) {
        match self {
            RxError::ConnClosed => {
                warn!("{}", self);
            }
            RxError::ConnError(error) => {
                warn!(%error, "{}", self);
            }
            RxError::MsgDecodeError(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for RxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RxError::ConnClosed => {
                write!(f, "connection closed by remote end")
            }
            RxError::ConnError(..) => {
                write!(f, "connection error")
            }
            RxError::MsgDecodeError(..) => {
                write!(f, "failed to decode BGP message")
            }
        }
    }
}

impl std::error::Error for RxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RxError::MsgDecodeError(error) => Some(error),
            _ => None,
        }
    }
}
