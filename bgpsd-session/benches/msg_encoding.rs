use std::hint::black_box;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use bgpsd_session::packet::capability::Capabilities;
use bgpsd_session::packet::consts::BGP_VERSION;
use bgpsd_session::packet::message::{Message, OpenMsg};
use bgpsd_utils::bgp::AfiSafi;
use criterion::{Criterion, criterion_group, criterion_main};

static MESSAGE: Lazy<Message> = Lazy::new(|| {
    let mut capa = Capabilities {
        refresh: true,
        enhanced_rr: true,
        as4byte: true,
        ..Default::default()
    };
    *capa.mp.get_mut(AfiSafi::Ipv4Unicast) = true;
    *capa.mp.get_mut(AfiSafi::Ipv6Unicast) = true;

    Message::Open(OpenMsg {
        version: BGP_VERSION,
        short_as: 1,
        holdtime: 180,
        identifier: Ipv4Addr::from_str("1.1.1.1").unwrap(),
        capa,
        role: None,
        as4: Some(65550),
    })
});

fn msg_encode(n: u64) {
    for _ in 0..n {
        MESSAGE.encode();
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("Message encode", |b| {
        b.iter(|| msg_encode(black_box(10000)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
