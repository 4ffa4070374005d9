//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bgpsd_session::packet::message::{Message, NotificationMsg};

use super::{test_decode_msg, test_encode_msg};

static NOTIFICATION1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x15, 0x03, 0x04, 0x00,
        ],
        Message::Notification(NotificationMsg {
            error_code: 4,
            error_subcode: 0,
            data: vec![],
        }),
    )
});

static NOTIFICATION2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x03, 0x01, 0x02, 0x10,
            0x00,
        ],
        Message::Notification(NotificationMsg {
            error_code: 1,
            error_subcode: 2,
            data: vec![0x10, 0x00],
        }),
    )
});

// Administrative shutdown carrying an RFC 9003 reason string.
static NOTIFICATION3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    let mut data = vec![0x07];
    data.extend_from_slice(b"goodbye");
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1d, 0x03, 0x06, 0x02, 0x07,
            0x67, 0x6f, 0x6f, 0x64, 0x62, 0x79, 0x65,
        ],
        Message::Notification(NotificationMsg {
            error_code: 6,
            error_subcode: 2,
            data,
        }),
    )
});

#[test]
fn test_encode_notification1() {
    let (ref bytes, ref msg) = *NOTIFICATION1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_notification1() {
    let (ref bytes, ref msg) = *NOTIFICATION1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_notification2() {
    let (ref bytes, ref msg) = *NOTIFICATION2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_notification2() {
    let (ref bytes, ref msg) = *NOTIFICATION2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_notification3() {
    let (ref bytes, ref msg) = *NOTIFICATION3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_notification3() {
    let (ref bytes, ref msg) = *NOTIFICATION3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_shutdown_reason() {
    let Message::Notification(msg) = &NOTIFICATION3.1 else {
        unreachable!();
    };
    assert_eq!(msg.shutdown_reason().as_deref(), Some("goodbye"));

    let Message::Notification(msg) = &NOTIFICATION1.1 else {
        unreachable!();
    };
    assert_eq!(msg.shutdown_reason(), None);
}

#[test]
fn test_encode_notification_truncated() {
    // Oversized data is truncated so the message fits the maximum size.
    let msg = Message::Notification(NotificationMsg {
        error_code: 6,
        error_subcode: 4,
        data: vec![0xab; 5000],
    });

    let bytes = msg.encode();
    assert_eq!(bytes.len(), 4096);
    assert_eq!(&bytes[16..18], &[0x10, 0x00]);
}
