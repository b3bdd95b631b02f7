//! Terminal outcomes and progress events of a job.

use std::fmt;

use serde::Serialize;

use crate::status::FaultCode;

/// The bounded wait that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitSite {
    CommandReady,
    PrintStart,
    HeaderPoll,
    NextPage,
    StopCheck,
    /// No reply to a status inquiry.
    Reply,
}

impl fmt::Display for WaitSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CommandReady => "device ready",
            Self::PrintStart => "print start",
            Self::HeaderPoll => "buffer space",
            Self::NextPage => "previous page",
            Self::StopCheck => "stop check",
            Self::Reply => "status reply",
        };
        f.write_str(name)
    }
}

/// Why a job failed. `Display` is the human message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("Printer unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Timed out waiting for {0}")]
    CommandTimeout(WaitSite),

    #[error("Printer fault: {0}")]
    DeviceFault(FaultCode),

    #[error("Printer is busy printing another job")]
    DeviceBusy,

    #[error("Device check failed")]
    CheckDeviceFailed,

    #[error("Failed to start printing")]
    StartPrintFailed,

    #[error("Data transfer error")]
    DataTransferFailed,

    #[error("Timed out stopping the printer")]
    StopTimeout,

    #[error("Printing was stopped")]
    Aborted,

    #[error("Printing was interrupted by the device")]
    Interrupted,

    #[error("Malformed status reply")]
    MalformedReply,
}

/// Terminal result of a job. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(kind) => Some(kind),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure(kind) => write!(f, "failure: {kind}"),
        }
    }
}

/// Consumable details read back from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterialInfo {
    pub serial: u16,
    pub device_serial: String,
    pub label_serial: Option<String>,
    pub uuid: Option<String>,
    pub gap: Option<u8>,
    pub paper_type: Option<u8>,
    pub custom: bool,
}

/// Result of a readback query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Report {
    Dpi(f32),
    Material(MaterialInfo),
}

/// Non-terminal notifications emitted while a job runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A non-fatal fault was seen. Reported once per job.
    Advisory { fault: FaultCode },
    /// The buffer commit for `page` never went out; the job continues.
    CommitFailed { page: usize },
    /// `page` (1-based) was fully transferred and committed.
    PageSent { page: usize },
    /// The current batch is empty; push the next one now.
    BatchDrained,
    /// The device has printed `count` pages.
    Printed { count: u16 },
    Report { report: Report },
}
