//! # Presence Bus Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Codec | Encode small and oversized payloads into frames |
//! | Codec | Decode frames and reassemble chunk groups |
//! | Dispatcher | Call signature hashing and pending table sweeps |

use call_dispatcher::{CallSignature, PendingCall, PendingCallTable};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use shared_bus::codec::ChunkAccept;
use shared_bus::{ChunkReassembler, Codec, Frame};
use shared_types::CallId;

const FRAME_LIMIT: usize = 16 * 1024;

fn payload(bytes: usize) -> Value {
    json!({ "name": "echo", "args": { "blob": "x".repeat(bytes) } })
}

// ============================================================================
// CODEC
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-encode");
    let codec = Codec::new(FRAME_LIMIT);

    for size in [256, 8 * 1024, 64 * 1024, 512 * 1024] {
        let value = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &value, |b, value| {
            b.iter(|| black_box(codec.encode(value).map(|frames| frames.len())))
        });
    }

    group.finish();
}

fn bench_decode_and_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-reassemble");
    let codec = Codec::new(FRAME_LIMIT);

    for size in [64 * 1024, 512 * 1024] {
        let frames = match codec.encode(&payload(size)) {
            Ok(frames) => frames,
            Err(e) => panic!("benchmark payload must encode: {e}"),
        };
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("reassemble", size), &frames, |b, frames| {
            b.iter(|| {
                let mut reassembler = ChunkReassembler::with_defaults();
                let mut complete = None;
                for frame in frames {
                    if let Ok(Frame::Chunk(envelope)) = Codec::decode(frame) {
                        if let Ok(ChunkAccept::Complete(bytes)) =
                            reassembler.accept("bench", envelope, 0)
                        {
                            complete = Some(bytes.len());
                        }
                    }
                }
                black_box(complete)
            })
        });
    }

    group.finish();
}

// ============================================================================
// DISPATCHER
// ============================================================================

fn bench_signature(c: &mut Criterion) {
    let args = json!({ "shape": "circle", "radius": 12, "points": (0..64).collect::<Vec<_>>() });
    c.bench_function("call-signature", |b| {
        b.iter(|| black_box(CallSignature::of("paint_canvas", &args)))
    });
}

fn bench_pending_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending-sweep");

    for size in [100, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("sweep", size), &size, |b, &size| {
            b.iter(|| {
                let mut table = PendingCallTable::new();
                for i in 0..size {
                    let signature = CallSignature::of("echo", &json!({ "i": i }));
                    table.insert(PendingCall::new(
                        CallId::new(format!("call-{i}")),
                        "echo",
                        signature,
                        "bench",
                        i as u64,
                    ));
                }
                black_box(table.sweep(size as u64 + 30_001, 30_000).len())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode_and_reassemble,
    bench_signature,
    bench_pending_sweep
);
criterion_main!(benches);
