//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serial_studio_core::core::chart::TelemetryStore;
use serial_studio_core::core::codec::{parse_hex_payload, DisplayMode, EntryType, FrameDecoder, TextEncoding};
use serial_studio_core::core::logger::LogAggregator;
use serial_studio_core::core::trigger::{AutoReplyRule, HighlightRule, PatternEngine};

fn telemetry_stream(lines: usize) -> Vec<u8> {
    (0..lines)
        .map(|i| format!("temp:{}.{},humi:{}\n", 20 + i % 10, i % 10, 40 + i % 30))
        .collect::<String>()
        .into_bytes()
}

fn codec_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();
    let text = telemetry_stream(64);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("hex_display", |b| {
        let mut decoder = FrameDecoder::new(DisplayMode::Hex, TextEncoding::Utf8);
        b.iter(|| black_box(decoder.decode(black_box(&data))))
    });

    group.bench_function("utf8_stream", |b| {
        let mut decoder = FrameDecoder::new(DisplayMode::Text, TextEncoding::Utf8);
        b.iter(|| black_box(decoder.decode(black_box(&text))))
    });

    group.bench_function("gbk_stream", |b| {
        let mut decoder = FrameDecoder::new(DisplayMode::Text, TextEncoding::Gbk);
        b.iter(|| black_box(decoder.decode(black_box(&text))))
    });

    group.bench_function("hex_payload_parse", |b| {
        let payload = hex::encode_upper(&data);
        b.iter(|| black_box(parse_hex_payload(black_box(&payload))))
    });

    group.finish();
}

fn pipeline_benchmark(c: &mut Criterion) {
    let stream = telemetry_stream(256);
    let chunks: Vec<&[u8]> = stream.chunks(37).collect();
    let rules = PatternEngine::new(
        vec![AutoReplyRule::new("PING", "PONG\n")],
        vec![HighlightRule::new("ERROR", "hl-error")],
    );

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("decode_aggregate_extract", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::default();
            let mut log = LogAggregator::new();
            let mut telemetry = TelemetryStore::new();
            let mut replies = 0;
            for chunk in &chunks {
                for unit in decoder.decode(chunk).units {
                    log.append_unit(&unit, Some(&rules));
                    telemetry.ingest(&unit.text);
                    replies += rules.replies_for(&unit.text).len();
                }
            }
            black_box((log.len(), telemetry.snapshot(), replies))
        })
    });

    group.bench_function("append_eviction", |b| {
        let mut log = LogAggregator::new();
        b.iter(|| {
            for _ in 0..100 {
                log.append(EntryType::Tx, black_box("AT+GMR\r\n"), false);
            }
            black_box(log.len())
        })
    });

    group.finish();
}

criterion_group!(benches, codec_benchmark, pipeline_benchmark);
criterion_main!(benches);
