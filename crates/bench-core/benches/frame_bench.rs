//! Criterion benchmarks for the serial frame codec and the state tracker.
//!
//! At 9600 baud the device delivers roughly 240 frames per second, so the
//! receive path must decode a frame and push it into the telemetry backlog
//! far below that budget.
//!
//! Run with:
//! ```bash
//! cargo bench --package bench-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use bench_core::protocol::commands::Sensor;
use bench_core::{decode_frame, BoundedQueue, DeviceStateTracker, Frame, StreamMode};

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// A receive buffer holding `frames` oscilloscope samples back to back.
fn make_rx_buffer(frames: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| [0x08, (i >> 8) as u8, i as u8, 0xFE])
        .collect()
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Benchmarks draining receive buffers of increasing size frame by frame.
fn bench_decode_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_stream");

    for frames in [1usize, 16, 240] {
        let buffer = make_rx_buffer(frames);
        group.bench_with_input(BenchmarkId::new("frames", frames), &buffer, |b, buffer| {
            b.iter(|| {
                let mut cursor = 0;
                let mut decoded = 0;
                while let Ok((frame, used)) = decode_frame(black_box(&buffer[cursor..])) {
                    black_box(frame);
                    cursor += used;
                    decoded += 1;
                }
                decoded
            })
        });
    }

    group.finish();
}

/// Benchmarks hex rendering, used for every telemetry frame sent to a client.
fn bench_hex(c: &mut Criterion) {
    let frame = Frame::command(0x05, 0x0004);
    let text = frame.to_hex();

    c.bench_function("frame_to_hex", |b| b.iter(|| black_box(&frame).to_hex()));
    c.bench_function("frame_from_hex", |b| {
        b.iter(|| Frame::from_hex(black_box(&text)).unwrap())
    });
}

/// Benchmarks the drop-oldest backlog at its steady state (always full).
fn bench_backlog_overflow(c: &mut Criterion) {
    let mut queue = BoundedQueue::new(50);
    for i in 0..50u16 {
        queue.push(Frame::command(0x08, i));
    }
    let frame = Frame::command(0x08, 0x0100);

    c.bench_function("backlog_push_full", |b| {
        b.iter(|| queue.push(black_box(frame)))
    });
}

/// Benchmarks the tracker decisions made per client request.
fn bench_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");

    group.bench_function("mode_switch", |b| {
        let mut tracker = DeviceStateTracker::new();
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            let target = if flip {
                StreamMode::Oscilloscope
            } else {
                StreamMode::MultimeterDcVoltage
            };
            tracker.request_mode_switch(black_box(target)).frames()
        })
    });

    let mut tracker = DeviceStateTracker::new();
    tracker.request_mode_switch(StreamMode::MultimeterAcVoltage);
    group.bench_function("one_shot_wrap", |b| {
        b.iter(|| tracker.one_shot_wrap(black_box(Sensor::Distance.read_frame())))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_stream,
    bench_hex,
    bench_backlog_overflow,
    bench_tracker
);
criterion_main!(benches);
