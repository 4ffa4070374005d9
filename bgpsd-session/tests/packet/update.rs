//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bytes::Bytes;

use bgpsd_session::packet::message::{Message, UpdateMsg};

use super::{test_decode_msg, test_encode_msg};

// End-of-RIB marker: an empty UPDATE message.
static UPDATE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x02, 0x00, 0x00, 0x00,
            0x00,
        ],
        Message::Update(UpdateMsg {
            data: Bytes::from_static(&[0x00, 0x00, 0x00, 0x00]),
        }),
    )
});

// A withdraw of 10.0.0.0/8; the body stays opaque to the session engine.
static UPDATE2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x19, 0x02, 0x00, 0x02, 0x08,
            0x0a, 0x00, 0x00,
        ],
        Message::Update(UpdateMsg {
            data: Bytes::from_static(&[0x00, 0x02, 0x08, 0x0a, 0x00, 0x00]),
        }),
    )
});

#[test]
fn test_encode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_update_framing() {
    // The encoded message is the header followed by the verbatim body.
    let body = vec![0x00, 0x00, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef];
    let msg = Message::Update(UpdateMsg {
        data: Bytes::from(body.clone()),
    });

    let bytes = msg.encode();
    assert_eq!(bytes.len(), 19 + body.len());
    assert_eq!(&bytes[19..], &body[..]);
}
