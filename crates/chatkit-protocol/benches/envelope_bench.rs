//! Envelope encode/decode benchmarks
//!
//! Every message crossing the frame boundary is encoded once and decoded once,
//! so both directions sit on the hot path.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use chatkit_protocol::{
    ChatKitError, Envelope, ErrorKind, FrameMessage, Nonce, command_wire_name,
};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};

fn create_command_of_size(size: usize) -> Envelope {
    Envelope::new(FrameMessage::Command {
        nonce: Nonce::new(),
        command: command_wire_name("sendUserMessage"),
        data: json!({ "text": "x".repeat(size) }),
    })
}

fn bench_encode_command(c: &mut Criterion) {
    let envelope = create_command_of_size(1024);

    c.bench_function("encode_command_1kb", |b| {
        b.iter(|| black_box(&envelope).to_value().unwrap())
    });
}

fn bench_decode_command(c: &mut Criterion) {
    let wire = create_command_of_size(1024).to_value().unwrap();

    c.bench_function("decode_command_1kb", |b| {
        b.iter(|| Envelope::from_value(black_box(wire.clone())).unwrap())
    });
}

fn bench_ignore_foreign_traffic(c: &mut Criterion) {
    let wire = json!({ "source": "react-devtools", "payload": { "x": 1 } });

    c.bench_function("ignore_foreign", |b| {
        b.iter(|| Envelope::from_value(black_box(wire.clone())).unwrap())
    });
}

fn bench_error_round_trip(c: &mut Criterion) {
    let error = ChatKitError::http("not found", 404, "Not Found");

    c.bench_function("error_round_trip", |b| {
        b.iter(|| {
            let value: Value = black_box(&error).to_value();
            ChatKitError::from_possible_frame_safe_error(&value).unwrap()
        })
    });
    c.bench_function("wrap_stream_error", |b| {
        b.iter(|| ChatKitError::new(black_box(ErrorKind::StreamEventParsing), "bad"))
    });
}

fn bench_encode_various_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_various_sizes");

    for size in [16, 256, 4096, 65_536].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let envelope = create_command_of_size(size);
            b.iter(|| black_box(&envelope).to_value().unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_command,
    bench_decode_command,
    bench_ignore_foreign_traffic,
    bench_error_round_trip,
    bench_encode_various_sizes
);
criterion_main!(benches);
