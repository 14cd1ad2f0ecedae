use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tickbus_codec::cobs;

fn sample_packet(len: usize) -> Vec<u8> {
    (0..len).map(|index| (index % 7) as u8).collect()
}

fn bench_encode(c: &mut Criterion) {
    let short = sample_packet(16);
    let long = sample_packet(4096);

    c.bench_function("cobs encode 16 bytes", |b| {
        b.iter(|| cobs::encode(black_box(&short)))
    });
    c.bench_function("cobs encode 4 KiB", |b| {
        b.iter(|| cobs::encode(black_box(&long)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let encoded = cobs::encode(&sample_packet(4096));

    c.bench_function("cobs decode 4 KiB", |b| {
        b.iter(|| cobs::decode(black_box(&encoded)))
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
