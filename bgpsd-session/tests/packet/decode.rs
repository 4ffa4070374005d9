//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpsd_session::packet::consts::MessageType;
use bgpsd_session::packet::error::{DecodeError, MessageHeaderError};
use bgpsd_session::packet::message::Message;

fn header(len: u16, msg_type: u8) -> Vec<u8> {
    let mut bytes = vec![0xff; 16];
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.push(msg_type);
    bytes
}

#[test]
fn test_incomplete_header() {
    let bytes = vec![0xff; 18];
    assert_eq!(Message::parse_header(&bytes), Ok(None));
}

#[test]
fn test_bad_marker() {
    let mut bytes = header(19, 4);
    bytes[15] = 0x00;

    assert_eq!(
        Message::parse_header(&bytes),
        Err(DecodeError::MessageHeader(
            MessageHeaderError::ConnectionNotSynchronized
        )),
    );
}

#[test]
fn test_length_too_small() {
    assert_eq!(
        Message::parse_header(&header(18, 4)),
        Err(DecodeError::MessageHeader(
            MessageHeaderError::BadMessageLength(18)
        )),
    );
}

#[test]
fn test_length_too_large() {
    assert_eq!(
        Message::parse_header(&header(4097, 2)),
        Err(DecodeError::MessageHeader(
            MessageHeaderError::BadMessageLength(4097)
        )),
    );
}

#[test]
fn test_length_max() {
    assert_eq!(
        Message::parse_header(&header(4096, 2)),
        Ok(Some((4096, MessageType::Update))),
    );
}

#[test]
fn test_bad_type() {
    assert_eq!(
        Message::parse_header(&header(19, 9)),
        Err(DecodeError::MessageHeader(
            MessageHeaderError::BadMessageType(9)
        )),
    );
}

#[test]
fn test_per_type_length_floors() {
    // A 19-byte message is only acceptable for KEEPALIVE.
    assert_eq!(
        Message::parse_header(&header(19, 4)),
        Ok(Some((19, MessageType::Keepalive))),
    );
    for (msg_type, min_len) in
        [(1u8, 29u16), (2, 23), (3, 21), (5, 23)]
    {
        assert_eq!(
            Message::parse_header(&header(19, msg_type)),
            Err(DecodeError::MessageHeader(
                MessageHeaderError::BadMessageLength(19)
            )),
        );
        assert!(matches!(
            Message::parse_header(&header(min_len, msg_type)),
            Ok(Some(_)),
        ));
    }

    // KEEPALIVE messages have exactly the header length.
    assert_eq!(
        Message::parse_header(&header(20, 4)),
        Err(DecodeError::MessageHeader(
            MessageHeaderError::BadMessageLength(20)
        )),
    );
}
