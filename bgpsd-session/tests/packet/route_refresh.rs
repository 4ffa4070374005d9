//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bgpsd_session::packet::message::{Message, RouteRefreshMsg};

use super::{test_decode_msg, test_encode_msg};

static ROUTE_REFRESH1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x05, 0x00, 0x01, 0x00,
            0x01,
        ],
        Message::RouteRefresh(RouteRefreshMsg {
            afi: 1,
            subtype: 0,
            safi: 1,
        }),
    )
});

// RFC 7313 Begin-of-RR demarcation for IPv6 unicast.
static ROUTE_REFRESH2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x05, 0x00, 0x02, 0x01,
            0x01,
        ],
        Message::RouteRefresh(RouteRefreshMsg {
            afi: 2,
            subtype: 1,
            safi: 1,
        }),
    )
});

#[test]
fn test_encode_route_refresh1() {
    let (ref bytes, ref msg) = *ROUTE_REFRESH1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_route_refresh1() {
    let (ref bytes, ref msg) = *ROUTE_REFRESH1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_route_refresh2() {
    let (ref bytes, ref msg) = *ROUTE_REFRESH2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_route_refresh2() {
    let (ref bytes, ref msg) = *ROUTE_REFRESH2;
    test_decode_msg(bytes, msg);
}
