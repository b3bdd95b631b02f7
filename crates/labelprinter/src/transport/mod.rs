//! Report transports.
//!
//! A transport moves fixed 64-byte HID reports to and from one device.
//! [`HidrawTransport`] talks to a Linux hidraw node; [`ScriptedTransport`]
//! answers from a closure and records every write, for dry runs and tests.

mod hidraw;
mod scripted;

pub use hidraw::HidrawTransport;
pub use scripted::{DeviceSim, ScriptedTransport, WriteLog};

use std::future::Future;

use crate::{REPORT_SIZE, Result};

/// Byte pipe to one printer.
///
/// Implementations must be cancel-safe in `recv_report`: the session drops
/// a pending receive when the reply timeout fires or a control message
/// arrives, then calls it again.
pub trait Transport: Send {
    /// Write one output report.
    fn send_report(&mut self, report: &[u8; REPORT_SIZE]) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next input report.
    fn recv_report(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Release the device. Further sends fail with `TransportClosed`.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
