//! Label printer job engine for packetized HID thermal printers.
//!
//! One print-job state machine drives five device families (G, SP, TP,
//! TP-B, T5080). Family differences live in [`Profile`] tables; the
//! [`Engine`] is sans-IO and the [`session`] module runs it over a
//! [`Transport`] with tokio timers.

pub mod codec;
pub mod engine;
pub mod job;
pub mod options;
pub mod outcome;
pub mod profile;
pub mod raster;
pub mod session;
pub mod status;
pub mod transport;

// Re-exports for convenience
pub use engine::{Action, Engine, Event, Query};
pub use job::{JobParams, Page, PrintJob, TagPayload};
pub use options::SessionOptions;
pub use outcome::{ErrorKind, JobEvent, MaterialInfo, Outcome, Report, WaitSite};
pub use profile::{Family, Profile};
pub use session::{Control, Session};
pub use status::{DeviceStatus, FaultCode};
pub use raster::Packed;
pub use transport::{DeviceSim, HidrawTransport, ScriptedTransport, Transport};

/// HID report size used for every frame in both directions.
pub const REPORT_SIZE: usize = 64;

/// Errors returned by the library API (not job outcomes).
#[derive(Debug, thiserror::Error)]
pub enum LabelPrinterError {
    #[error("A print job is already active on this engine")]
    JobActive,

    #[error("No print job is active")]
    NoActiveJob,

    #[error("Unknown printer family: {0}")]
    UnknownFamily(String),

    #[error("{family} printers do not support {operation}")]
    Unsupported {
        family: &'static str,
        operation: &'static str,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Payload of {0} bytes exceeds the 16-bit length field")]
    PayloadTooLarge(usize),

    #[error("Engine stopped without reporting an outcome")]
    Stalled,

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Result type alias for labelprinter operations.
pub type Result<T> = std::result::Result<T, LabelPrinterError>;
