//! Segmentation, reassembly and end-to-end request benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hiqnet_bench::param_set;
use hiqnet_client::{Connection, ConnectionConfig};
use hiqnet_protocol::{decode_message, encode_message, Flags};
use hiqnet_transport::memory::{pair, DeviceEnd};
use hiqnet_transport::{
    segment_message, ControlCommand, ControlReport, Reassembler, TransportConfig,
    DEFAULT_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
};
use std::sync::Arc;
use std::time::Duration;

fn bench_segment(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment");

    for count in [1u16, 16, 128] {
        let encoded = encode_message(&param_set(count)).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(encoded.len()),
            &encoded,
            |b, encoded| {
                b.iter(|| black_box(segment_message(1, encoded, DEFAULT_FRAME_SIZE).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassemble");

    for count in [1u16, 16, 128] {
        let encoded = encode_message(&param_set(count)).unwrap();
        let frames = segment_message(1, &encoded, DEFAULT_FRAME_SIZE).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(encoded.len()),
            &frames,
            |b, frames| {
                b.iter(|| {
                    let mut reassembler = Reassembler::new(DEFAULT_MAX_MESSAGE_SIZE);
                    let mut done = None;
                    for frame in frames {
                        done = reassembler.push(frame).unwrap();
                    }
                    black_box(done.unwrap())
                });
            },
        );
    }

    group.finish();
}

async fn await_ack(device: &mut DeviceEnd, expected: ControlCommand, tx: u8) {
    while let Some(report) = device.recv_control().await {
        if report.command == expected && report.transaction_id == tx {
            return;
        }
    }
}

/// Echoes every request back with the info flag set.
async fn echo_device(mut device: DeviceEnd) {
    let mut next_tx = 0x80u8;
    while let Some(report) = device.recv_control().await {
        let is_allocate = report.command == ControlCommand::AllocateRequest;
        if let Some(ack) = report.acknowledge() {
            let _ = device.send_control(ack);
        }
        if !is_allocate {
            continue;
        }

        let Some(raw) = device.recv_message().await else {
            return;
        };
        let Some(dealloc) = device.recv_control().await else {
            return;
        };
        if let Some(ack) = dealloc.acknowledge() {
            let _ = device.send_control(ack);
        }

        let mut reply = decode_message(&raw).unwrap();
        std::mem::swap(&mut reply.header.source, &mut reply.header.destination);
        reply.header.flags.insert(Flags::INFO);
        let bytes = encode_message(&reply).unwrap();

        let tx = next_tx;
        next_tx = next_tx.checked_add(1).unwrap_or(0x80);
        let length = bytes.len() as u32;
        let _ = device.send_control(ControlReport::new(
            ControlCommand::AllocateRequest,
            length,
            tx,
        ));
        await_ack(&mut device, ControlCommand::AllocateAck, tx).await;
        let _ = device.send_message(tx, &bytes, DEFAULT_FRAME_SIZE);
        let _ = device.send_control(ControlReport::new(
            ControlCommand::DeallocateRequest,
            length,
            tx,
        ));
        await_ack(&mut device, ControlCommand::DeallocateAck, tx).await;
    }
}

fn bench_request_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (link, device) = pair();
    let config = ConnectionConfig::default()
        .with_transport(TransportConfig::new().with_poll_interval(Duration::from_micros(200)));
    let conn = Arc::new(Connection::new(link, config));

    rt.spawn(echo_device(device));
    rt.block_on(conn.connect()).unwrap();

    let mut group = c.benchmark_group("request_roundtrip");
    group.sample_size(20);
    for count in [1u16, 16] {
        let message = param_set(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &message, |b, message| {
            b.to_async(&rt)
                .iter(|| async { black_box(conn.request(message.clone()).await.unwrap()) });
        });
    }
    group.finish();

    conn.close();
}

criterion_group!(
    benches,
    bench_segment,
    bench_reassemble,
    bench_request_roundtrip
);
criterion_main!(benches);
