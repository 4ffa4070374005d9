//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use bgpsd_session::packet::capability::Capabilities;
use bgpsd_session::packet::consts::{AddPathFlags, BGP_VERSION, Role};
use bgpsd_session::packet::error::{DecodeError, OpenMessageError};
use bgpsd_session::packet::message::{Message, OpenMsg};
use bgpsd_utils::bgp::AfiSafi;

use super::{test_decode_msg, test_encode_msg};

static OPEN1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1d, 0x01, 0x04, 0xfd, 0xe9,
            0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x00,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            short_as: 65001,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("10.0.0.1").unwrap(),
            capa: Default::default(),
            role: None,
            as4: None,
        }),
    )
});

static OPEN2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    let mut capa = Capabilities {
        refresh: true,
        as4byte: true,
        ..Default::default()
    };
    *capa.mp.get_mut(AfiSafi::Ipv4Unicast) = true;

    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x2d, 0x01, 0x04, 0xfd, 0xe9,
            0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x10, 0x02, 0x0e, // params
            0x01, 0x04, 0x00, 0x01, 0x00, 0x01, // multiprotocol
            0x02, 0x00, // route refresh
            0x41, 0x04, 0x00, 0x00, 0xfd, 0xe9, // 4-octet AS
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            short_as: 65001,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("10.0.0.1").unwrap(),
            capa,
            role: None,
            as4: Some(65001),
        }),
    )
});

static OPEN3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    let mut capa = Capabilities {
        refresh: true,
        enhanced_rr: true,
        as4byte: true,
        policy: 1,
        ..Default::default()
    };
    *capa.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
    *capa.mp.get_mut(AfiSafi::Ipv6Unicast) = true;
    *capa.add_path.get_mut(AfiSafi::Ipv4Unicast) = AddPathFlags::RECV;
    capa.grestart.restart = 1;
    capa.grestart.restart_bit = true;

    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x46, 0x01, 0x04, 0xfd, 0xe9,
            0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x29, 0x02, 0x27, // params
            0x01, 0x04, 0x00, 0x01, 0x00, 0x01, // multiprotocol ipv4
            0x01, 0x04, 0x00, 0x02, 0x00, 0x01, // multiprotocol ipv6
            0x02, 0x00, // route refresh
            0x09, 0x01, 0x00, // role (provider)
            0x40, 0x02, 0x80, 0x00, // graceful restart
            0x41, 0x04, 0x00, 0x03, 0x00, 0x00, // 4-octet AS
            0x45, 0x08, 0x00, 0x01, 0x01, 0x01, 0x00, 0x02, 0x01,
            0x00, // add-path
            0x46, 0x00, // enhanced route refresh
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            short_as: 65001,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("10.0.0.1").unwrap(),
            capa,
            role: Some(Role::Provider),
            as4: Some(196608),
        }),
    )
});

// The same capability list as OPEN2, but wrapped in the RFC 9072 extended
// optional parameters encoding.
static OPEN4_EXTENDED: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    let mut capa = Capabilities {
        refresh: true,
        as4byte: true,
        ..Default::default()
    };
    *capa.mp.get_mut(AfiSafi::Ipv4Unicast) = true;

    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x31, 0x01, 0x04, 0xfd, 0xe9,
            0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0xff, // sentinel
            0xff, 0x00, 0x11, // extended length parameter
            0x02, 0x00, 0x0e, // capabilities, two-byte length
            0x01, 0x04, 0x00, 0x01, 0x00, 0x01, // multiprotocol
            0x02, 0x00, // route refresh
            0x41, 0x04, 0x00, 0x00, 0xfd, 0xe9, // 4-octet AS
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            short_as: 65001,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("10.0.0.1").unwrap(),
            capa,
            role: None,
            as4: Some(65001),
        }),
    )
});

#[test]
fn test_encode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_decode_open4_extended() {
    let (ref bytes, ref msg) = *OPEN4_EXTENDED;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_decode_open_full_grestart() {
    // Full graceful restart capability: timeout 120, IPv4 unicast with the
    // Forward flag.
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x27, 0x01, 0x04, 0xfd, 0xe9,
        0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x0a, 0x02, 0x08, 0x40, 0x06,
        0x00, 0x78, 0x00, 0x01, 0x01, 0x80,
    ];

    let msg = Message::decode(&bytes).unwrap();
    let Message::Open(msg) = msg else {
        panic!("expected OPEN message");
    };
    assert_eq!(msg.capa.grestart.restart, 2);
    assert_eq!(msg.capa.grestart.timeout, 120);
    assert!(!msg.capa.grestart.restart_bit);
    use bgpsd_session::packet::consts::GrFlags;
    let flags = msg.capa.grestart.flags.get(AfiSafi::Ipv4Unicast);
    assert!(flags.contains(GrFlags::PRESENT));
    assert!(flags.contains(GrFlags::FORWARD));
    assert!(!flags.contains(GrFlags::RESTART));
}

#[test]
fn test_decode_open_bad_version() {
    let (bytes, _) = &*OPEN1;
    let mut bytes = bytes.clone();
    bytes[19] = 0x03;

    assert_eq!(
        Message::decode(&bytes),
        Err(DecodeError::OpenMessage(OpenMessageError::UnsupportedVersion(
            3
        ))),
    );
}

#[test]
fn test_decode_open_zero_as() {
    let (bytes, _) = &*OPEN1;
    let mut bytes = bytes.clone();
    bytes[20] = 0x00;
    bytes[21] = 0x00;

    assert_eq!(
        Message::decode(&bytes),
        Err(DecodeError::OpenMessage(OpenMessageError::BadPeerAs)),
    );
}

#[test]
fn test_decode_open_zero_identifier() {
    let (bytes, _) = &*OPEN1;
    let mut bytes = bytes.clone();
    bytes[24..28].copy_from_slice(&[0, 0, 0, 0]);

    assert_eq!(
        Message::decode(&bytes),
        Err(DecodeError::OpenMessage(OpenMessageError::BadBgpIdentifier)),
    );
}

#[test]
fn test_decode_open_length_mismatch() {
    // optparamlen = 0 requires a 29-byte message.
    let (bytes, _) = &*OPEN1;
    let mut bytes = bytes.clone();
    bytes.push(0x00);
    bytes[17] = 0x1e;

    assert_eq!(
        Message::decode(&bytes),
        Err(DecodeError::OpenMessage(OpenMessageError::MalformedOptParam)),
    );
}

#[test]
fn test_decode_open_malformed_extended() {
    // Extended form whose inner length disagrees with the message length.
    let (bytes, _) = &*OPEN4_EXTENDED;
    let mut bytes = bytes.clone();
    bytes[30] = 0x00;
    bytes[31] = 0x12;

    assert_eq!(
        Message::decode(&bytes),
        Err(DecodeError::OpenMessage(OpenMessageError::MalformedOptParam)),
    );
}

#[test]
fn test_decode_open_unknown_param() {
    // Unsupported optional parameter type 1 (deprecated authentication).
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x21, 0x01, 0x04, 0xfd, 0xe9,
        0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x04, 0x01, 0x02, 0xca, 0xfe,
    ];

    assert_eq!(
        Message::decode(&bytes),
        Err(DecodeError::OpenMessage(OpenMessageError::UnsupportedOptParam(
            1
        ))),
    );
}
