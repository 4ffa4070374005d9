//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod decode;
mod keepalive;
mod notification;
mod open;
mod route_refresh;
mod update;

use bgpsd_session::packet::message::Message;

//
// Helper functions.
//

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    let bytes_actual = msg.encode();
    assert_eq!(bytes_expected, &bytes_actual[..]);
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    let (msg_len, _) = Message::parse_header(bytes)
        .expect("invalid message header")
        .expect("buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_len]).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}
