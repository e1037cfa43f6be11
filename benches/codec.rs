use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use udp_voice_link::codec;
use udp_voice_link::constants::{FRAME_SIZE, SAMPLE_RATE};

// A 440 Hz tone at roughly half scale
fn tone(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 16000.0) as i16
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for len in [160, FRAME_SIZE, FRAME_SIZE * 4] {
        let pcm = tone(len);
        let mut out = Vec::with_capacity(len);
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("alloc", len), &pcm, |b, pcm| {
            b.iter(|| codec::encode(black_box(pcm)))
        });
        group.bench_with_input(BenchmarkId::new("reuse", len), &pcm, |b, pcm| {
            b.iter(|| codec::encode_into(black_box(pcm), &mut out))
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for len in [160, FRAME_SIZE, FRAME_SIZE * 4] {
        let encoded = codec::encode(&tone(len));
        let mut out = Vec::with_capacity(len);
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("alloc", len), &encoded, |b, encoded| {
            b.iter(|| codec::decode(black_box(encoded)))
        });
        group.bench_with_input(BenchmarkId::new("reuse", len), &encoded, |b, encoded| {
            b.iter(|| codec::decode_into(black_box(encoded), &mut out))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
