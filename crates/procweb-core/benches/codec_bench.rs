//! Criterion benchmarks for the procweb categorized-message codec.
//!
//! Measures encoding and decoding cost for typical message sizes: single
//! keystrokes from the terminal, and full output chunks (the output adapters
//! read up to 2048 bytes at a time).
//!
//! Run with:
//! ```bash
//! cargo bench --package procweb-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use procweb_core::{decode_message, encode_message, CategorizedMessage, StreamDecoder};

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_keystroke() -> CategorizedMessage {
    CategorizedMessage::stdin("a")
}

fn make_line() -> CategorizedMessage {
    CategorizedMessage::stdin("the quick brown fox jumps over the lazy dog\n")
}

fn make_output_chunk() -> CategorizedMessage {
    CategorizedMessage::stdout("x".repeat(2048))
}

fn make_escaped_chunk() -> CategorizedMessage {
    // Quotes, newlines and control characters all need JSON escaping.
    CategorizedMessage::stdout("\"\n\t\u{1b}[0m".repeat(256))
}

fn fixtures() -> Vec<(&'static str, CategorizedMessage)> {
    vec![
        ("keystroke", make_keystroke()),
        ("line", make_line()),
        ("output_2k", make_output_chunk()),
        ("escaped_2k", make_escaped_chunk()),
    ]
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks `encode_message` for every fixture.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_message");
    for (name, msg) in fixtures() {
        group.bench_with_input(BenchmarkId::new("msg", name), &msg, |b, msg| {
            b.iter(|| encode_message(black_box(msg)).expect("encode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks `decode_message` for every fixture (from pre-encoded bytes).
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_message");
    for (name, msg) in fixtures() {
        let text = encode_message(&msg).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("msg", name), &text, |b, text| {
            b.iter(|| decode_message(black_box(text.as_bytes())).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks the stream decoder on a frame packed with 64 keystrokes.
fn bench_stream_decoder(c: &mut Criterion) {
    let frame: Vec<u8> = (0..64)
        .flat_map(|_| encode_message(&make_keystroke()).unwrap().into_bytes())
        .collect();

    c.bench_function("stream_decoder_64_keystrokes", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::new();
            decoder.feed(black_box(&frame));
            let mut n = 0;
            while let Some(msg) = decoder.next_message().unwrap() {
                black_box(msg);
                n += 1;
            }
            n
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_stream_decoder);
criterion_main!(benches);
