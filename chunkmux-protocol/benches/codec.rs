//! Benchmarks for the chunked codec and frame format

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::pedantic)]

use bytes::{Bytes, BytesMut};
use chunkmux_protocol::{ChunkedCodec, Frame, StreamId};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};

const PAYLOAD_SIZES: [usize; 5] = [64, 1024, 4096, 16384, 65536];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let id = StreamId::generate();

    for size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let frame = Frame::data(id.clone(), Bytes::from(vec![0u8; size]));

        group.bench_with_input(BenchmarkId::new("data_frame", size), &frame, |b, frame| {
            let mut codec = ChunkedCodec::new();
            let mut buf = BytesMut::with_capacity(size + 64);

            b.iter(|| {
                buf.clear();
                codec
                    .encode(black_box(frame.encode()), &mut buf)
                    .expect("encode failed");
                black_box(&buf);
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let id = StreamId::generate();

    for size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let mut encoded = BytesMut::new();
        ChunkedCodec::new()
            .encode(Frame::data(id.clone(), Bytes::from(vec![0u8; size])).encode(), &mut encoded)
            .expect("encode failed");
        let encoded = encoded.freeze();

        group.bench_with_input(BenchmarkId::new("data_frame", size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut codec = ChunkedCodec::new();
                let mut buf = BytesMut::from(&encoded[..]);
                let chunk = codec.decode(&mut buf).expect("decode failed");
                black_box(chunk);
            });
        });
    }

    group.finish();
}

fn bench_frame_parse(c: &mut Criterion) {
    let raw = Frame::open(StreamId::generate(), Bytes::from_static(b"example.com:443")).encode();

    c.bench_function("frame_parse_open", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&raw)).expect("parse failed")));
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_frame_parse);
criterion_main!(benches);
