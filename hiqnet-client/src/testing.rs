//! Simulated device for tests.

use crate::connection::ConnectionConfig;
use hiqnet_protocol::{decode_message, encode_message, Message};
use hiqnet_transport::memory::DeviceEnd;
use hiqnet_transport::{ControlCommand, ControlReport, TransportConfig, DEFAULT_FRAME_SIZE};
use std::time::Duration;
use tokio::task::JoinHandle;

pub(crate) fn fast_config() -> ConnectionConfig {
    ConnectionConfig::default().with_transport(
        TransportConfig::new()
            .with_poll_interval(Duration::from_millis(1))
            .with_busy_backoff(Duration::from_millis(1), Duration::from_millis(4)),
    )
}

fn ack(device: &DeviceEnd, report: ControlReport) {
    if let Some(ack) = report.acknowledge() {
        device.send_control(ack).unwrap();
    }
}

/// Waits for the host's answer to one of our control requests.
async fn await_ack(device: &mut DeviceEnd, expected: ControlCommand, tx: u8) -> Option<()> {
    loop {
        let report = device.recv_control().await?;
        if report.command == expected && report.transaction_id == tx {
            return Some(());
        }
    }
}

/// Runs a device that acks the host's transfers and answers every received
/// message with whatever `handler` returns.
pub(crate) fn simulate_device<F>(mut device: DeviceEnd, handler: F) -> JoinHandle<()>
where
    F: Fn(Message) -> Vec<Message> + Send + 'static,
{
    tokio::spawn(async move {
        let mut next_tx: u8 = 0x80;
        while let Some(report) = device.recv_control().await {
            if report.command != ControlCommand::AllocateRequest {
                ack(&device, report);
                continue;
            }
            ack(&device, report);

            let Some(raw) = device.recv_message().await else {
                return;
            };
            let Some(dealloc) = device.recv_control().await else {
                return;
            };
            assert_eq!(dealloc.command, ControlCommand::DeallocateRequest);
            ack(&device, dealloc);

            let request = decode_message(&raw).unwrap();
            for reply in handler(request) {
                let bytes = encode_message(&reply).unwrap();
                let tx = next_tx;
                next_tx = next_tx.checked_add(1).unwrap_or(0x80);

                let length = bytes.len() as u32;
                device
                    .send_control(ControlReport::new(ControlCommand::AllocateRequest, length, tx))
                    .unwrap();
                if await_ack(&mut device, ControlCommand::AllocateAck, tx).await.is_none() {
                    return;
                }
                device.send_message(tx, &bytes, DEFAULT_FRAME_SIZE).unwrap();
                device
                    .send_control(ControlReport::new(ControlCommand::DeallocateRequest, length, tx))
                    .unwrap();
                if await_ack(&mut device, ControlCommand::DeallocateAck, tx).await.is_none() {
                    return;
                }
            }
        }
    })
}
