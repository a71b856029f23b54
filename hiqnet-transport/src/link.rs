//! Physical link boundary.

use crate::control::CONTROL_REPORT_SIZE;
use bytes::Bytes;
use std::future::Future;
use std::io;

/// The narrow contract the transport needs from a physical link.
///
/// A USB HID device maps data frames to interrupt reports and control
/// reports to feature reports; any link moving fixed-size reports fits.
/// All methods take `&self` so reads, writes and control polling can run
/// from separate tasks.
pub trait PhysicalLink: Send + Sync + 'static {
    /// Writes one fixed-size data frame.
    fn write_frame(&self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Waits for the next inbound data frame.
    fn read_frame(&self) -> impl Future<Output = io::Result<Bytes>> + Send;

    /// Sends a control report to the device.
    fn send_control(
        &self,
        report: [u8; CONTROL_REPORT_SIZE],
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Queries the device's pending control report; all zeros when idle.
    fn query_control(&self) -> impl Future<Output = io::Result<[u8; CONTROL_REPORT_SIZE]>> + Send;
}
