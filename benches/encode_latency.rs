// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

//! Hot-path benchmarks for the response encoder.
//!
//! Measures:
//! - Tool-call parsing across input shapes (clean, fenced, heuristic, plain text)
//! - Stop-sequence matching over a fragmented stream
//! - Chunk framing of a content delta
//!
//! Run: cargo bench --bench encode_latency

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use mooring::message::ToolCall;
use mooring::stream::{sse_frame, Delta, ResponseContext, StopMatcher};
use mooring::toolcall;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const CLEAN: &str =
    r#"{"tool_calls":[{"name":"get_weather","arguments":{"city":"Oslo","unit":"celsius"}}]}"#;

const FENCED: &str = "Assistant: ```json\n{\"tool_calls\":[{\"name\":\"get_weather\",\"arguments\":{\"city\":\"Oslo\",\"unit\":\"celsius\"}}]}\n```";

const HEURISTIC: &str =
    r#"Sure! I will call "name": "get_weather" with "arguments": {"city": "Oslo"} now"#;

fn plain_text() -> String {
    "The quick brown fox jumps over the lazy dog. ".repeat(40)
}

fn fragments() -> Vec<String> {
    plain_text()
        .split_inclusive(' ')
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_toolcall_parse(c: &mut Criterion) {
    let plain = plain_text();
    let mut group = c.benchmark_group("toolcall_parse");
    for (name, input) in [
        ("clean", CLEAN),
        ("fenced", FENCED),
        ("heuristic", HEURISTIC),
        ("plain_text", plain.as_str()),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), input, |b, input| {
            b.iter(|| toolcall::parse(black_box(input)))
        });
    }
    group.finish();
}

fn bench_toolcall_render(c: &mut Criterion) {
    let calls = vec![
        ToolCall::function("get_weather", r#"{"city":"Oslo"}"#),
        ToolCall::function("get_time", r#"{"tz":"Europe/Oslo"}"#),
    ];
    c.bench_function("toolcall_render", |b| {
        b.iter(|| toolcall::render(black_box(&calls)))
    });
}

fn bench_stop_matcher(c: &mut Criterion) {
    let fragments = fragments();
    let mut group = c.benchmark_group("stop_matcher");
    for stops in [0usize, 1, 4] {
        let sequences: Vec<String> = ["</s>", "STOP", "\n\nUser:", "###"]
            .iter()
            .take(stops)
            .map(|s| s.to_string())
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(stops), &sequences, |b, sequences| {
            b.iter(|| {
                let mut matcher = StopMatcher::new(sequences);
                let mut emitted = 0;
                for fragment in &fragments {
                    emitted += matcher.push(black_box(fragment)).emit.len();
                }
                emitted + matcher.finish().len()
            })
        });
    }
    group.finish();
}

fn bench_chunk_frame(c: &mut Criterion) {
    let ctx = ResponseContext::new("local-model", 120);
    c.bench_function("chunk_frame", |b| {
        b.iter(|| {
            let delta = Delta {
                content: Some(black_box("The quick brown fox ").to_string()),
                ..Default::default()
            };
            sse_frame(&ctx.chunk(delta, None))
        })
    });
}

criterion_group!(
    benches,
    bench_toolcall_parse,
    bench_toolcall_render,
    bench_stop_matcher,
    bench_chunk_frame
);
criterion_main!(benches);
