//! Record marshaling and buffered call benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rasbridge::marshal::{Entry, NativeRecord, RasConnection, VpnStrategy};
use rasbridge::native::EntryPoint;
use rasbridge::{Capability, RasClient, SimulatedRas};
use std::hint::black_box;
use std::sync::Arc;

fn entry_marshal_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_marshal");
    let entry = Entry::vpn("Office", "vpn.example.com", VpnStrategy::Ikev2First);

    for cap in Capability::ALL {
        let bytes = entry.encode(cap).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", cap), &cap, |b, cap| {
            b.iter(|| {
                let bytes = black_box(&entry).encode(*cap).unwrap();
                black_box(bytes);
            });
        });
        group.bench_with_input(BenchmarkId::new("decode", cap), &bytes, |b, bytes| {
            b.iter(|| {
                let decoded = Entry::decode(black_box(bytes), cap).unwrap();
                black_box(decoded);
            });
        });
    }

    group.finish();
}

fn connection_array_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_array");
    let cap = Capability::Win7;

    for count in [1usize, 16, 64] {
        let sim = Arc::new(SimulatedRas::new(cap));
        for i in 0..count {
            sim.add_connection(&format!("Conn {i}"), "WAN Miniport (IKEv2)");
        }
        let client = RasClient::with_capability(sim, cap);
        let connections = client.connections().unwrap();
        let bytes = RasConnection::encode_array(&connections, cap).unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("decode", count), &bytes, |b, bytes| {
            b.iter(|| {
                let decoded = RasConnection::decode_array(black_box(bytes), count, cap).unwrap();
                black_box(decoded);
            });
        });
    }

    group.finish();
}

fn buffered_call_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_call");
    let cap = Capability::Win8;

    let sim = Arc::new(SimulatedRas::new(cap));
    for i in 0..8 {
        sim.add_connection(&format!("Conn {i}"), "WAN Miniport (SSTP)");
    }
    let client = RasClient::with_capability(sim.clone(), cap);

    group.bench_function("enum_connections", |b| {
        b.iter(|| {
            let connections = black_box(&client).connections().unwrap();
            black_box(connections);
        });
    });

    group.bench_function("enum_connections_with_growth", |b| {
        b.iter(|| {
            sim.force_growth(EntryPoint::EnumConnections, 3);
            let connections = black_box(&client).connections().unwrap();
            black_box(connections);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    entry_marshal_benchmark,
    connection_array_benchmark,
    buffered_call_benchmark
);
criterion_main!(benches);
