//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Supported (AFI,SAFI) tuples.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AfiSafi {
    Ipv4Unicast,
    Ipv6Unicast,
}

// Container storing one value per supported (AFI,SAFI) tuple.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AfiSafis<T> {
    pub ipv4_unicast: T,
    pub ipv6_unicast: T,
}

// ===== impl AfiSafi =====

impl AfiSafi {
    pub const ALL: [AfiSafi; 2] = [AfiSafi::Ipv4Unicast, AfiSafi::Ipv6Unicast];
}

impl std::fmt::Display for AfiSafi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AfiSafi::Ipv4Unicast => write!(f, "IPv4 unicast"),
            AfiSafi::Ipv6Unicast => write!(f, "IPv6 unicast"),
        }
    }
}

// ===== impl AfiSafis =====

impl<T> AfiSafis<T> {
    pub fn get(&self, afi_safi: AfiSafi) -> &T {
        match afi_safi {
            AfiSafi::Ipv4Unicast => &self.ipv4_unicast,
            AfiSafi::Ipv6Unicast => &self.ipv6_unicast,
        }
    }

    pub fn get_mut(&mut self, afi_safi: AfiSafi) -> &mut T {
        match afi_safi {
            AfiSafi::Ipv4Unicast => &mut self.ipv4_unicast,
            AfiSafi::Ipv6Unicast => &mut self.ipv6_unicast,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AfiSafi, &T)> {
        AfiSafi::ALL.into_iter().map(|afi_safi| (afi_safi, self.get(afi_safi)))
    }
}
