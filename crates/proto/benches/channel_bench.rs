//! Channel data path benchmarks
//!
//! Covers framing, connection message codecs and window accounting, the
//! work done per chunk of channel data.
//!
//! Run with: `cargo bench --bench channel_bench`

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether_proto::ssh::connection::{ChannelRequestType, ConnectionMessage};
use tether_proto::ssh::{FrameCodec, LocalWindow, Window};

const PAYLOAD_SIZES: [usize; 3] = [1024, 16 * 1024, 32 * 1024];

fn channel_data(size: usize) -> ConnectionMessage {
    ConnectionMessage::ChannelData {
        recipient_channel: 7,
        data: vec![0x5a; size],
    }
}

/// Benchmark framing of channel data payloads
fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");
    let codec = FrameCodec::default();

    for size in PAYLOAD_SIZES {
        let payload = channel_data(size).to_bytes();
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, payload| {
            let mut out = BytesMut::with_capacity(payload.len() + 4);
            b.iter(|| {
                out.clear();
                codec.encode(black_box(payload), &mut out).unwrap();
            });
        });

        let mut framed = BytesMut::new();
        codec.encode(&payload, &mut framed).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", size), &framed, |b, framed| {
            b.iter(|| {
                let mut buf = framed.clone();
                black_box(codec.decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark connection message serialization
fn bench_connection_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_message");

    for size in PAYLOAD_SIZES {
        let message = channel_data(size);
        let bytes = message.to_bytes();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("data_to_bytes", size), &message, |b, m| {
            b.iter(|| black_box(m.to_bytes()))
        });
        group.bench_with_input(BenchmarkId::new("data_from_bytes", size), &bytes, |b, bytes| {
            b.iter(|| ConnectionMessage::from_bytes(black_box(bytes)).unwrap())
        });
    }

    let request = ConnectionMessage::ChannelRequest {
        recipient_channel: 3,
        request: ChannelRequestType::Exec {
            command: "tar czf - /var/lib/app".to_string(),
        },
        want_reply: true,
    };
    let bytes = request.to_bytes();
    group.bench_function("exec_request_round_trip", |b| {
        b.iter(|| {
            let encoded = black_box(&request).to_bytes();
            ConnectionMessage::from_bytes(&encoded).unwrap()
        })
    });
    group.bench_function("exec_request_from_bytes", |b| {
        b.iter(|| ConnectionMessage::from_bytes(black_box(&bytes)).unwrap())
    });

    group.finish();
}

/// Benchmark window accounting for a stream of 32 KiB packets
fn bench_windows(c: &mut Criterion) {
    let mut group = c.benchmark_group("window");
    const INITIAL: u32 = 2 * 1024 * 1024;
    const PACKET: u32 = 32 * 1024;

    group.throughput(Throughput::Bytes(INITIAL as u64));

    group.bench_function("send_consume_adjust", |b| {
        b.iter(|| {
            let mut window = Window::new(INITIAL);
            while window.available() >= PACKET {
                window.consume(black_box(PACKET)).unwrap();
            }
            window.adjust(INITIAL - window.available()).unwrap();
            black_box(window.available())
        })
    });

    group.bench_function("receive_release", |b| {
        b.iter(|| {
            let mut window = LocalWindow::new(INITIAL);
            let mut advertised = 0u64;
            for _ in 0..(INITIAL / PACKET) {
                window.receive(black_box(PACKET)).unwrap();
                if let Some(bytes) = window.release(PACKET) {
                    advertised += bytes as u64;
                }
            }
            black_box(advertised)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_codec,
    bench_connection_message,
    bench_windows
);
criterion_main!(benches);
