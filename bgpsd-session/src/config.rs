//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::packet::capability::Capabilities;
use crate::packet::consts::{AS_TRANS, Role};

// Protocol constants that are not negotiable.
pub const MSG_PROCESS_LIMIT: usize = 100;
pub const MSG_QUEUE_HIGH_MARK: usize = 1024 * 1024;
pub const MSG_QUEUE_LOW_MARK: usize = 256 * 1024;

// Timer defaults and bounds, in seconds.
pub const INTERVAL_HOLD_INITIAL: u16 = 240;
pub const INTERVAL_SEND_HOLD_MIN: u16 = 30;
pub const INTERVAL_IDLE_HOLD_INITIAL: u16 = 5;
pub const INTERVAL_HOLD_CLONED: u64 = 3600;
pub const INTERVAL_HOLD_DEMOTED: u16 = 60;
pub const MAX_IDLE_HOLD: u16 = 3600;
pub const SESSION_CLEAR_DELAY: u16 = 5;
pub const DEFAULT_HOLDTIME: u16 = 90;
pub const DEFAULT_MIN_HOLDTIME: u16 = 3;
pub const DEFAULT_CONNECT_RETRY: u16 = 120;

// Peer id ranges. Statically configured peers get low ids from the parent;
// peers cloned from a template at accept time allocate ids from the dynamic
// range.
pub const PEER_ID_NONE: u32 = 0;
pub const PEER_ID_STATIC_MAX: u32 = 0x7fff_ffff;
pub const PEER_ID_DYN_MAX: u32 = 0xffff_ffff;

// Global session engine configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SessionCfg {
    pub asn: u32,
    pub bgpid: Ipv4Addr,
    pub holdtime: u16,
    pub min_holdtime: u16,
    pub connect_retry: u16,
}

// Per-peer configuration, received from the parent process.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PeerConfig {
    pub id: u32,
    pub group_id: u32,
    pub descr: String,
    pub group: String,
    pub template: bool,
    pub remote_addr: IpAddr,
    pub remote_masklen: u8,
    pub remote_port: u16,
    pub local_addr_v4: Option<Ipv4Addr>,
    pub local_addr_v6: Option<std::net::Ipv6Addr>,
    pub remote_as: u32,
    pub local_as: u32,
    pub local_short_as: u16,
    pub ebgp: bool,
    pub enforce_as: bool,
    pub distance: u8,
    pub ttl_security: bool,
    pub passive: bool,
    pub down: bool,
    pub holdtime: u16,
    pub min_holdtime: u16,
    pub max_prefix_restart: u16,
    pub max_out_prefix_restart: u16,
    pub role: Option<Role>,
    pub capabilities: Capabilities,
    pub announce_capa: bool,
    pub if_depend: Option<String>,
    pub demote_group: Option<String>,
    pub md5_password: Option<String>,
    pub reason: Option<String>,
}

// Pre-opened listening socket description; the descriptor itself travels as
// ancillary data next to the message carrying this.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ListenerCfg {
    pub addr: SocketAddr,
    pub reconf: ReconfAction,
}

// Staged-reload action tags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ReconfAction {
    #[default]
    None,
    Keep,
    Reinit,
    Delete,
}

// ===== impl SessionCfg =====

impl SessionCfg {
    // Returns the 2-octet AS number announced in the OPEN message.
    pub fn short_as(&self) -> u16 {
        u16::try_from(self.asn).unwrap_or(AS_TRANS)
    }
}

impl Default for SessionCfg {
    fn default() -> SessionCfg {
        SessionCfg {
            asn: 0,
            bgpid: Ipv4Addr::UNSPECIFIED,
            holdtime: DEFAULT_HOLDTIME,
            min_holdtime: DEFAULT_MIN_HOLDTIME,
            connect_retry: DEFAULT_CONNECT_RETRY,
        }
    }
}

// ===== impl PeerConfig =====

impl PeerConfig {
    // Effective hold time, falling back to the global default.
    pub fn holdtime(&self, global: &SessionCfg) -> u16 {
        if self.holdtime != 0 {
            self.holdtime
        } else {
            global.holdtime
        }
    }

    // Effective minimum acceptable hold time.
    pub fn min_holdtime(&self, global: &SessionCfg) -> u16 {
        if self.min_holdtime != 0 {
            self.min_holdtime
        } else {
            global.min_holdtime
        }
    }
}
