//! Benchmarks for TDC decoder performance.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use tdc_core::parser::unpack_frame;
use tdc_core::synth::PulseTrain;
use tdc_core::types::FRAME_LEN;
use tdc_core::{RawFrame, TdcDecoder};

fn synthetic_stream(pulses: usize) -> Vec<u8> {
    let train = PulseTrain {
        channel: 0,
        period_ns: 1_003,
        width_ns: 101,
        pulses,
    };
    train.to_bytes(&mut StdRng::seed_from_u64(42))
}

fn decode_buffer_benchmark(c: &mut Criterion) {
    let data = synthetic_stream(100_000);

    let mut group = c.benchmark_group("decode_buffer");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("synthetic_100k_pulses", |b| {
        b.iter(|| {
            let mut decoder = TdcDecoder::new();
            let events = decoder.decode_buffer(black_box(&data)).unwrap();
            black_box(events.len())
        })
    });

    group.finish();
}

fn decode_frames_benchmark(c: &mut Criterion) {
    // Pre-parsed frames isolate edge reconstruction from resynchronization.
    let frames: VecDeque<RawFrame> = synthetic_stream(100_000)
        .chunks_exact(FRAME_LEN)
        .filter_map(|chunk| {
            let bytes: [u8; FRAME_LEN] = chunk.try_into().ok()?;
            unpack_frame(&bytes).ok()
        })
        .collect();

    let mut group = c.benchmark_group("decode_frames");
    group.throughput(Throughput::Elements(frames.len() as u64));

    group.bench_function("synthetic_100k_pulses", |b| {
        b.iter(|| {
            let mut decoder = TdcDecoder::new();
            let mut source = frames.clone();
            let count = decoder
                .events(black_box(&mut source))
                .filter(|e| e.is_ok())
                .count();
            black_box(count)
        })
    });

    group.finish();
}

criterion_group!(benches, decode_buffer_benchmark, decode_frames_benchmark);
criterion_main!(benches);
