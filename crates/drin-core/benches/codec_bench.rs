//! Criterion benchmarks for the DrinViewer text codec and event payload.
//!
//! Discovery datagrams are parsed once per reply, so the text paths are
//! cheap; the event payload carries an image and dominates on the wire.
//!
//! Run with:
//! ```bash
//! cargo bench --package drin-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use drin_core::protocol::codec::{
    decode_event_body, encode_discovery_response, encode_event_payload, parse_discovery_request,
    parse_discovery_response, parse_pairing_response, parse_request_line,
};
use drin_core::protocol::messages::{DiscoveryResponse, EVENT_LENGTH_PREFIX};
use drin_core::{DrinEvent, EventAction};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_event(image_len: usize) -> DrinEvent {
    let event = DrinEvent::new("Alice Example", "+1 555 0100", EventAction::ShowPopup);
    if image_len == 0 {
        event
    } else {
        event.with_image(vec![0xA5; image_len])
    }
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Parsing of every text line a peer can receive.
fn bench_text_parse(c: &mut Criterion) {
    let lines: &[(&str, &str)] = &[
        ("DiscoverRequest", "DISCOVER:0F8FAD5B-D9CB-469F-A165-70867728950E"),
        (
            "DiscoverResponse",
            "DISCOVER_RESPONSE:ISPAIRED:office-desktop:DISCOVER_RESPONSE_END",
        ),
        ("PairMe", "PAIRME:0F8FAD5B-D9CB-469F-A165-70867728950E"),
        ("PairedOk", "PAIRED:OK"),
    ];

    let mut group = c.benchmark_group("text_parse");
    for (name, line) in lines {
        group.bench_with_input(BenchmarkId::new("line", name), line, |b, line| {
            b.iter(|| match *name {
                "DiscoverRequest" => parse_discovery_request(black_box(line)).is_ok(),
                "DiscoverResponse" => parse_discovery_response(black_box(line)).is_ok(),
                "PairMe" => parse_request_line(black_box(line)).is_ok(),
                _ => parse_pairing_response(black_box(line)).is_ok(),
            })
        });
    }
    group.finish();
}

fn bench_discovery_response_encode(c: &mut Criterion) {
    let response = DiscoveryResponse {
        paired: true,
        host_name: Some("office-desktop".to_string()),
    };
    c.bench_function("encode_discovery_response", |b| {
        b.iter(|| encode_discovery_response(black_box(&response)).expect("encode must succeed"))
    });
}

/// Event payload encode+decode with growing image sizes.
fn bench_event_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_payload_roundtrip");
    for image_len in [0usize, 16 * 1024, 256 * 1024] {
        let event = make_event(image_len);
        group.bench_with_input(
            BenchmarkId::new("image_bytes", image_len),
            &event,
            |b, event| {
                b.iter(|| {
                    let bytes = encode_event_payload(black_box(event)).unwrap();
                    decode_event_body(black_box(&bytes[EVENT_LENGTH_PREFIX..])).unwrap()
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_text_parse,
    bench_discovery_response_encode,
    bench_event_payload
);
criterion_main!(benches);
