//! Lookup and decode throughput over a synthetic database.

use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};

use criterion::{criterion_group, criterion_main, Criterion};
use mmdbkit::{Reader, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[path = "../tests/common/mod.rs"]
mod common;

use common::{record, TestDb};

fn build_database() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut db = TestDb::new(6).with_aliases();
    for _ in 0..1024 {
        let a = rng.random::<u8>();
        let b = rng.random::<u8>();
        let c = rng.random::<u8>();
        let net = format!("{a}.{b}.{c}.0/24");
        db.insert(
            &net,
            record(&[("network", net.as_str()), ("time_zone", "Europe/London")]),
        );
    }
    db.build()
}

fn random_addresses(count: usize) -> Vec<IpAddr> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|_| IpAddr::V4(Ipv4Addr::from(rng.random::<u32>())))
        .collect()
}

fn bench_lookups(c: &mut Criterion) {
    let bytes = build_database();
    let reader = Reader::from_bytes(bytes).unwrap();
    let addresses = random_addresses(4096);

    c.bench_function("lookup", |b| {
        let mut i = 0;
        b.iter(|| {
            let addr = addresses[i & (addresses.len() - 1)];
            i += 1;
            black_box(reader.lookup(addr).unwrap().found())
        })
    });

    c.bench_function("lookup_and_decode", |b| {
        let mut i = 0;
        b.iter(|| {
            let addr = addresses[i & (addresses.len() - 1)];
            i += 1;
            let result = reader.lookup(addr).unwrap();
            black_box(result.decode::<Value>().unwrap())
        })
    });

    c.bench_function("networks_full_iteration", |b| {
        b.iter(|| {
            let mut count = 0usize;
            for item in reader.networks() {
                item.unwrap();
                count += 1;
            }
            black_box(count)
        })
    });
}

criterion_group!(benches, bench_lookups);
criterion_main!(benches);
