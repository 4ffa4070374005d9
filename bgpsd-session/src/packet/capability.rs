//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpsd_utils::bgp::{AfiSafi, AfiSafis};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::packet::consts::{
    AddPathFlags, Afi, CAPA_GR_F_FLAG, CAPA_GR_R_FLAG, CAPA_GR_TIMEMASK,
    CapabilityCode, GrFlags, Role, Safi,
};
use crate::packet::error::{DecodeResult, OpenMessageError};

//
// Capability set of one side of a session.
//
// Three instances exist per peer: the set we announce, the set the peer sent
// in its OPEN, and the negotiated result of the two.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Capabilities {
    // Multi-Protocol, RFC 4760.
    pub mp: AfiSafis<bool>,
    // Route Refresh, RFC 2918.
    pub refresh: bool,
    // Enhanced Route Refresh, RFC 7313.
    pub enhanced_rr: bool,
    // 4-octet AS numbers, RFC 6793.
    pub as4byte: bool,
    // BGP Role, RFC 9234: 0 = off, 1 = announce, 2 = announce and enforce.
    pub policy: u8,
    // ADD-PATH, RFC 7911.
    pub add_path: AfiSafis<AddPathFlags>,
    // Graceful Restart, RFC 4724.
    pub grestart: GracefulRestart,
}

// Graceful restart capability state.
//
// `restart` distinguishes three support levels: 0 = none, 1 = the peer only
// understands the End-of-RIB marker, 2 = full per-AFI support.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct GracefulRestart {
    pub restart: u8,
    pub timeout: u16,
    pub restart_bit: bool,
    pub flags: AfiSafis<GrFlags>,
}

// ===== impl Capabilities =====

impl Capabilities {
    // Encodes the capability TLV list announced in an OPEN message.
    //
    // `as4` carries the local AS number for the 4-octet AS capability and
    // `role` the local role, both gated by the corresponding flags in `self`.
    pub(crate) fn encode(
        &self,
        buf: &mut BytesMut,
        as4: Option<u32>,
        role: Option<Role>,
    ) {
        // Multiprotocol extensions, RFC 4760.
        for (afi_safi, _) in self.mp.iter().filter(|(_, enabled)| **enabled) {
            put_capa(buf, CapabilityCode::MultiProtocol, 4);
            buf.put_u16(afi_safi.afi() as u16);
            buf.put_u8(0);
            buf.put_u8(afi_safi.safi() as u8);
        }

        // Route refresh, RFC 2918.
        if self.refresh {
            put_capa(buf, CapabilityCode::RouteRefresh, 0);
        }

        // BGP open policy, RFC 9234.
        if self.policy > 0
            && let Some(role) = role
        {
            put_capa(buf, CapabilityCode::BgpRole, 1);
            buf.put_u8(role as u8);
        }

        // Graceful restart and End-of-RIB marker, RFC 4724. Only the header
        // is announced; the Restart flag is set unless a restart is ongoing.
        if self.grestart.restart != 0 {
            let mut hdr: u16 = 0;
            if self.grestart.restart_bit {
                hdr |= CAPA_GR_R_FLAG;
            }
            put_capa(buf, CapabilityCode::GracefulRestart, 2);
            buf.put_u16(hdr);
        }

        // 4-octet AS numbers, RFC 6793.
        if self.as4byte
            && let Some(asn) = as4
        {
            put_capa(buf, CapabilityCode::FourOctetAsNumber, 4);
            buf.put_u32(asn);
        }

        // Advertisement of multiple paths, RFC 7911. The entries cover the
        // announced multiprotocol AFIs, defaulting to IPv4 unicast when no
        // multiprotocol capability is announced.
        if !self.add_path.get(AfiSafi::Ipv4Unicast).is_empty()
            || !self.add_path.get(AfiSafi::Ipv6Unicast).is_empty()
        {
            let mpcapa = self.mp.iter().filter(|(_, mp)| **mp).count();
            put_capa(
                buf,
                CapabilityCode::AddPath,
                if mpcapa != 0 { 4 * mpcapa as u8 } else { 4 },
            );
            if mpcapa != 0 {
                for (afi_safi, _) in
                    self.mp.iter().filter(|(_, enabled)| **enabled)
                {
                    put_afi(buf, afi_safi, self.add_path.get(afi_safi).bits());
                }
            } else {
                put_afi(
                    buf,
                    AfiSafi::Ipv4Unicast,
                    self.add_path.get(AfiSafi::Ipv4Unicast).bits(),
                );
            }
        }

        // Enhanced route refresh, RFC 7313.
        if self.enhanced_rr {
            put_capa(buf, CapabilityCode::EnhancedRouteRefresh, 0);
        }
    }

    // Parses one capability TLV list (the value of a Capabilities optional
    // parameter) into `self`.
    //
    // Individual capabilities with bad lengths are skipped or reset as each
    // capability specifies; only broken TLV framing and a zero 4-octet AS are
    // hard errors.
    pub(crate) fn parse(
        &mut self,
        buf: &mut Bytes,
        role: &mut Option<Role>,
        as4: &mut Option<u32>,
    ) -> DecodeResult<()> {
        while buf.remaining() > 0 {
            if buf.remaining() < 2 {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let capa_code = buf.get_u8();
            let capa_len = buf.get_u8();
            if capa_len as usize > buf.remaining() {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let mut capa_val = buf.copy_to_bytes(capa_len as usize);

            match CapabilityCode::from_u8(capa_code) {
                Some(CapabilityCode::MultiProtocol) => {
                    if capa_len != 4 {
                        warn!(%capa_len, "bad multiprotocol capability length");
                        continue;
                    }
                    let afi = capa_val.get_u16();
                    let _reserved = capa_val.get_u8();
                    let safi = capa_val.get_u8();
                    let Some(afi_safi) = afi_safi_from_wire(afi, safi) else {
                        warn!(%afi, %safi, "multiprotocol capability: unknown AFI/SAFI pair");
                        continue;
                    };
                    *self.mp.get_mut(afi_safi) = true;
                }
                Some(CapabilityCode::RouteRefresh) => {
                    self.refresh = true;
                }
                Some(CapabilityCode::BgpRole) => {
                    if capa_len != 1 {
                        warn!(%capa_len, "bad role capability length");
                        continue;
                    }
                    self.policy = 1;
                    *role = Role::from_u8(capa_val.get_u8());
                }
                Some(CapabilityCode::GracefulRestart) => {
                    if capa_len == 2 {
                        // Peer only supports the End-of-RIB marker.
                        let hdr = capa_val.get_u16();
                        self.grestart.restart = 1;
                        self.grestart.timeout = 0;
                        self.grestart.restart_bit = hdr & CAPA_GR_R_FLAG != 0;
                        continue;
                    } else if capa_len % 4 != 2 {
                        warn!(%capa_len, "bad graceful restart capability length");
                        self.grestart.restart = 0;
                        self.grestart.timeout = 0;
                        continue;
                    }

                    let hdr = capa_val.get_u16();
                    self.grestart.timeout = hdr & CAPA_GR_TIMEMASK;
                    self.grestart.restart_bit = hdr & CAPA_GR_R_FLAG != 0;
                    if self.grestart.timeout == 0 {
                        warn!("graceful restart timeout is zero");
                        self.grestart.restart = 0;
                        continue;
                    }

                    while capa_val.remaining() >= 4 {
                        let afi = capa_val.get_u16();
                        let safi = capa_val.get_u8();
                        let fl = capa_val.get_u8();
                        let Some(afi_safi) = afi_safi_from_wire(afi, safi)
                        else {
                            warn!(%afi, %safi, "graceful restart capability: unknown AFI/SAFI pair");
                            continue;
                        };
                        let flags = self.grestart.flags.get_mut(afi_safi);
                        flags.insert(GrFlags::PRESENT);
                        if fl & CAPA_GR_F_FLAG != 0 {
                            flags.insert(GrFlags::FORWARD);
                        }
                        if hdr & CAPA_GR_R_FLAG != 0 {
                            flags.insert(GrFlags::RESTART);
                        }
                        self.grestart.restart = 2;
                    }
                }
                Some(CapabilityCode::FourOctetAsNumber) => {
                    if capa_len != 4 {
                        warn!(%capa_len, "bad 4-octet AS capability length");
                        self.as4byte = false;
                        continue;
                    }
                    let asn = capa_val.get_u32();
                    if asn == 0 {
                        return Err(OpenMessageError::BadPeerAs.into());
                    }
                    self.as4byte = true;
                    *as4 = Some(asn);
                }
                Some(CapabilityCode::AddPath) => {
                    if capa_len % 4 != 0 {
                        warn!(%capa_len, "bad ADD-PATH capability length");
                        self.add_path = Default::default();
                        continue;
                    }
                    while capa_val.remaining() >= 4 {
                        let afi = capa_val.get_u16();
                        let safi = capa_val.get_u8();
                        let fl = capa_val.get_u8();
                        let Some(afi_safi) = afi_safi_from_wire(afi, safi)
                        else {
                            warn!(%afi, %safi, "ADD-PATH capability: unknown AFI/SAFI pair");
                            self.add_path = Default::default();
                            break;
                        };
                        let Some(flags) = AddPathFlags::from_bits(fl) else {
                            warn!(flags = %fl, "ADD-PATH capability: bad flags");
                            self.add_path = Default::default();
                            break;
                        };
                        *self.add_path.get_mut(afi_safi) = flags;
                    }
                }
                Some(CapabilityCode::EnhancedRouteRefresh) => {
                    self.enhanced_rr = true;
                }
                None => {
                    // Ignore unknown capability.
                }
            }
        }

        Ok(())
    }

    // Returns whether any multiprotocol AFI/SAFI is enabled.
    pub fn has_mp(&self) -> bool {
        self.mp.iter().any(|(_, enabled)| *enabled)
    }

    // Aggregates the per-AFI ADD-PATH bits.
    pub fn add_path_any(&self) -> AddPathFlags {
        self.add_path
            .iter()
            .fold(AddPathFlags::empty(), |acc, (_, flags)| acc | *flags)
    }
}

// ===== global functions =====

pub(crate) fn afi_safi_from_wire(afi: u16, safi: u8) -> Option<AfiSafi> {
    match (Afi::from_u16(afi)?, Safi::from_u8(safi)?) {
        (Afi::Ipv4, Safi::Unicast) => Some(AfiSafi::Ipv4Unicast),
        (Afi::Ipv6, Safi::Unicast) => Some(AfiSafi::Ipv6Unicast),
        _ => None,
    }
}

// Extension methods mapping (AFI,SAFI) tuples to their wire identifiers.
pub(crate) trait AfiSafiExt {
    fn afi(&self) -> Afi;
    fn safi(&self) -> Safi;
}

impl AfiSafiExt for AfiSafi {
    fn afi(&self) -> Afi {
        match self {
            AfiSafi::Ipv4Unicast => Afi::Ipv4,
            AfiSafi::Ipv6Unicast => Afi::Ipv6,
        }
    }

    fn safi(&self) -> Safi {
        Safi::Unicast
    }
}

fn put_capa(buf: &mut BytesMut, code: CapabilityCode, len: u8) {
    buf.put_u8(code.to_u8().unwrap());
    buf.put_u8(len);
}

fn put_afi(buf: &mut BytesMut, afi_safi: AfiSafi, flags: u8) {
    buf.put_u16(afi_safi.afi() as u16);
    buf.put_u8(afi_safi.safi() as u8);
    buf.put_u8(flags);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(tlv: &[u8]) -> (Capabilities, Option<Role>, Option<u32>) {
        let mut capa = Capabilities::default();
        let mut role = None;
        let mut as4 = None;
        let mut buf = Bytes::copy_from_slice(tlv);
        capa.parse(&mut buf, &mut role, &mut as4).unwrap();
        (capa, role, as4)
    }

    #[test]
    fn parse_mp_ipv4_unicast() {
        let (capa, _, _) = parse_one(&[0x01, 0x04, 0x00, 0x01, 0x00, 0x01]);
        assert!(*capa.mp.get(AfiSafi::Ipv4Unicast));
        assert!(!*capa.mp.get(AfiSafi::Ipv6Unicast));
    }

    #[test]
    fn parse_mp_unknown_safi_ignored() {
        let (capa, _, _) = parse_one(&[0x01, 0x04, 0x00, 0x01, 0x00, 0x80]);
        assert!(!capa.has_mp());
    }

    #[test]
    fn parse_grestart_eor_only() {
        // Two-byte graceful restart capability means EoR-only support.
        let (capa, _, _) = parse_one(&[0x40, 0x02, 0x80, 0x78]);
        assert_eq!(capa.grestart.restart, 1);
        assert_eq!(capa.grestart.timeout, 0);
    }

    #[test]
    fn parse_grestart_one_afi() {
        let (capa, _, _) =
            parse_one(&[0x40, 0x06, 0x80, 0x78, 0x00, 0x01, 0x01, 0x80]);
        assert_eq!(capa.grestart.restart, 2);
        assert_eq!(capa.grestart.timeout, 120);
        let flags = capa.grestart.flags.get(AfiSafi::Ipv4Unicast);
        assert!(flags.contains(GrFlags::PRESENT));
        assert!(flags.contains(GrFlags::FORWARD));
        assert!(flags.contains(GrFlags::RESTART));
    }

    #[test]
    fn parse_grestart_bad_length() {
        let (capa, _, _) =
            parse_one(&[0x40, 0x05, 0x80, 0x78, 0x00, 0x01, 0x01]);
        assert_eq!(capa.grestart.restart, 0);
    }

    #[test]
    fn parse_as4_zero_rejected() {
        let mut capa = Capabilities::default();
        let mut role = None;
        let mut as4 = None;
        let mut buf =
            Bytes::copy_from_slice(&[0x41, 0x04, 0x00, 0x00, 0x00, 0x00]);
        assert!(capa.parse(&mut buf, &mut role, &mut as4).is_err());
    }

    #[test]
    fn parse_unknown_capability_ignored() {
        let (capa, role, as4) = parse_one(&[0x80, 0x02, 0xde, 0xad]);
        assert_eq!(capa, Capabilities::default());
        assert_eq!(role, None);
        assert_eq!(as4, None);
    }

    #[test]
    fn parse_truncated_tlv() {
        let mut capa = Capabilities::default();
        let mut role = None;
        let mut as4 = None;
        let mut buf = Bytes::copy_from_slice(&[0x02, 0x04, 0x00]);
        assert!(capa.parse(&mut buf, &mut role, &mut as4).is_err());
    }

    #[test]
    fn encode_role() {
        let capa = Capabilities {
            policy: 1,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        capa.encode(&mut buf, None, Some(Role::Provider));
        assert_eq!(&buf[..], &[0x09, 0x01, 0x00]);
    }

    #[test]
    fn encode_parse_round_trip() {
        let mut capa = Capabilities {
            refresh: true,
            enhanced_rr: true,
            as4byte: true,
            ..Default::default()
        };
        *capa.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
        *capa.mp.get_mut(AfiSafi::Ipv6Unicast) = true;
        *capa.add_path.get_mut(AfiSafi::Ipv4Unicast) = AddPathFlags::RECV;

        let mut buf = BytesMut::new();
        capa.encode(&mut buf, Some(65550), None);

        let mut parsed = Capabilities::default();
        let mut role = None;
        let mut as4 = None;
        parsed
            .parse(&mut buf.freeze(), &mut role, &mut as4)
            .unwrap();
        assert_eq!(parsed, capa);
        assert_eq!(as4, Some(65550));
    }
}
