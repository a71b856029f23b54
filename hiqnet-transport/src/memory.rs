//! In-memory link pair.
//!
//! [`pair`] returns a host side implementing [`PhysicalLink`] and a device
//! side for simulated devices. Control reports sent by the device queue up
//! until the host polls for them, like feature reports on a real device.

use crate::control::{ControlReport, CONTROL_REPORT_SIZE};
use crate::link::PhysicalLink;
use crate::segment::{segment_message, Reassembler};
use crate::{TransportError, DEFAULT_MAX_MESSAGE_SIZE};
use bytes::Bytes;
use std::io;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "memory link closed")
}

/// Creates a connected host/device pair.
pub fn pair() -> (MemoryLink, DeviceEnd) {
    let (frames_to_device, frames_from_host) = unbounded_channel();
    let (frames_to_host, frames_from_device) = unbounded_channel();
    let (control_to_device, control_from_host) = unbounded_channel();
    let (control_to_host, control_from_device) = unbounded_channel();

    let link = MemoryLink {
        frames_to_device,
        frames_from_device: tokio::sync::Mutex::new(frames_from_device),
        control_to_device,
        control_from_device: parking_lot::Mutex::new(control_from_device),
    };
    let device = DeviceEnd {
        frames_from_host,
        frames_to_host,
        control_from_host,
        control_to_host,
        reassembler: Reassembler::new(DEFAULT_MAX_MESSAGE_SIZE),
    };
    (link, device)
}

/// Host side of an in-memory link.
pub struct MemoryLink {
    frames_to_device: UnboundedSender<Bytes>,
    frames_from_device: tokio::sync::Mutex<UnboundedReceiver<Bytes>>,
    control_to_device: UnboundedSender<[u8; CONTROL_REPORT_SIZE]>,
    control_from_device: parking_lot::Mutex<UnboundedReceiver<[u8; CONTROL_REPORT_SIZE]>>,
}

impl PhysicalLink for MemoryLink {
    async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        self.frames_to_device
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| closed())
    }

    async fn read_frame(&self) -> io::Result<Bytes> {
        self.frames_from_device
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(closed)
    }

    async fn send_control(&self, report: [u8; CONTROL_REPORT_SIZE]) -> io::Result<()> {
        self.control_to_device.send(report).map_err(|_| closed())
    }

    async fn query_control(&self) -> io::Result<[u8; CONTROL_REPORT_SIZE]> {
        match self.control_from_device.lock().try_recv() {
            Ok(report) => Ok(report),
            Err(TryRecvError::Empty) => Ok([0; CONTROL_REPORT_SIZE]),
            Err(TryRecvError::Disconnected) => Err(closed()),
        }
    }
}

/// Device side of an in-memory link.
pub struct DeviceEnd {
    frames_from_host: UnboundedReceiver<Bytes>,
    frames_to_host: UnboundedSender<Bytes>,
    control_from_host: UnboundedReceiver<[u8; CONTROL_REPORT_SIZE]>,
    control_to_host: UnboundedSender<[u8; CONTROL_REPORT_SIZE]>,
    reassembler: Reassembler,
}

impl DeviceEnd {
    /// Next control report written by the host; `None` once the host is gone.
    pub async fn recv_control(&mut self) -> Option<ControlReport> {
        loop {
            let raw = self.control_from_host.recv().await?;
            match ControlReport::decode(&raw) {
                Ok(Some(report)) => return Some(report),
                Ok(None) => continue,
                Err(e) => tracing::warn!("Device dropped control report: {}", e),
            }
        }
    }

    /// Queues a control report for the host's next poll.
    pub fn send_control(&self, report: ControlReport) -> Result<(), TransportError> {
        self.control_to_host
            .send(report.encode())
            .map_err(|_| TransportError::LinkClosed)
    }

    /// Next raw data frame written by the host.
    pub async fn recv_frame(&mut self) -> Option<Bytes> {
        self.frames_from_host.recv().await
    }

    /// Feeds a host frame into the device's reassembler.
    pub fn accept_frame(&mut self, frame: &[u8]) -> Result<Option<Bytes>, TransportError> {
        self.reassembler.push(frame)
    }

    /// Waits until a complete message from the host is reassembled.
    pub async fn recv_message(&mut self) -> Option<Bytes> {
        loop {
            let frame = self.frames_from_host.recv().await?;
            match self.reassembler.push(&frame) {
                Ok(Some(message)) => return Some(message),
                Ok(None) => continue,
                Err(e) => tracing::warn!("Device dropped frame: {}", e),
            }
        }
    }

    /// Sends a message to the host as segmented frames.
    pub fn send_message(
        &self,
        transaction_id: u8,
        message: &[u8],
        frame_size: usize,
    ) -> Result<(), TransportError> {
        for frame in segment_message(transaction_id, message, frame_size)? {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    /// Sends one raw frame to the host.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        self.frames_to_host
            .send(frame)
            .map_err(|_| TransportError::LinkClosed)
    }
}
