//! Per-family printer profiles.
//!
//! Supported families:
//! - G: inquiry-first handshake, speed-carrying buffer commit
//! - SP: material set before start, page-counter gate between pages
//! - TP / TP-B: material+cut in the check command, unacknowledged bulk data
//! - T5080: radio tag programming, speed chosen by batch size
//!
//! A profile is data only. The engine reads it and never branches on
//! [`Family`] directly.

pub mod g;
pub mod sp;
pub mod t5080;
pub mod tp;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::LabelPrinterError;
use crate::status::{BitMap, FaultCode};

/// Device family identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    G,
    Sp,
    Tp,
    TpB,
    T5080,
}

impl Family {
    pub const ALL: [Family; 5] = [Family::G, Family::Sp, Family::Tp, Family::TpB, Family::T5080];

    /// Static profile for this family.
    pub fn profile(self) -> &'static Profile {
        match self {
            Family::G => &g::PROFILE,
            Family::Sp => &sp::PROFILE,
            Family::Tp => &tp::PROFILE,
            Family::TpB => &tp::PROFILE_B,
            Family::T5080 => &t5080::PROFILE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Family::G => "g",
            Family::Sp => "sp",
            Family::Tp => "tp",
            Family::TpB => "tp-b",
            Family::T5080 => "t5080",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = LabelPrinterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "g" => Ok(Family::G),
            "sp" => Ok(Family::Sp),
            "tp" => Ok(Family::Tp),
            "tp-b" | "tpb" => Ok(Family::TpB),
            "t5080" => Ok(Family::T5080),
            other => Err(LabelPrinterError::UnknownFamily(other.to_string())),
        }
    }
}

/// Whether a fault aborts the job or is only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fatal,
    Advisory,
}

/// One row of a family's fault table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRule {
    pub code: FaultCode,
    pub severity: Severity,
}

impl FaultRule {
    pub const fn fatal(code: FaultCode) -> Self {
        Self {
            code,
            severity: Severity::Fatal,
        }
    }

    pub const fn advisory(code: FaultCode) -> Self {
        Self {
            code,
            severity: Severity::Advisory,
        }
    }
}

/// Opcode table. `None` means the family lacks the command.
#[derive(Debug, Clone, Copy)]
pub struct Opcodes {
    pub inquiry: u8,
    pub check_device: u8,
    pub start_print: u8,
    pub stop_print: u8,
    pub next_frame: u8,
    pub buffer_full: u8,
    pub set_material: Option<u8>,
    pub read_dpi: Option<DpiReadback>,
    pub read_material: Option<MaterialReadback>,
    pub tag_set: Option<u8>,
}

/// How a family reports label DPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiReadback {
    /// `672 / (send_data / 10)`, opcode chosen by plate vs other paper.
    DotRatio { plate: u8, other: u8 },
    /// Hundredths of a dot per mm at a paper-type dependent offset.
    PaperTyped(u8),
}

/// How a family lays out the material-info reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialReadback {
    /// Serial at bytes 31..33, device serial at 11..32.
    Short(u8),
    /// Serial at 16..18, uuid at 1..8, device serial at 40..56.
    Extended(u8),
}

/// Parameter carried by the check-device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckParam {
    Zero,
    /// `(material_code << 8) + cut_type`
    MaterialAndCut,
}

/// Parameter carried by the start-print command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartParam {
    Fixed(u16),
    MaterialCode,
    /// `density << 8`
    Density,
}

/// Condition that ends the wait after start-print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintActive {
    Printing,
    CommandIdle,
    /// Go straight to transfer once start-print is acknowledged.
    Immediate,
}

/// Condition that lets the next page's header go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextGate {
    /// Wait while the device buffer is full.
    BufferFree,
    /// Wait while the device page counter sits at `target - keep`.
    PageCounter,
}

/// Shape of the buffer-full commit frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFrame {
    /// Plain command, param 0.
    Plain,
    /// Plain command, param = page length.
    PageLength,
    /// Two-parameter command: page length and print speed.
    WithSpeed,
}

/// How the print speed sent with the commit is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedRule {
    FromParams,
    /// Slow speed for multi-page batches, fast for single pages.
    ByBatchSize { multi: u16, single: u16 },
}

/// A bounded poll: `budget` re-tries spaced by `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub budget: i32,
    pub delay: Duration,
}

impl Poll {
    pub const fn new(budget: i32, delay_ms: u64) -> Self {
        Self {
            budget,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

/// Flow quirks of a family.
#[derive(Debug, Clone, Copy)]
pub struct Flow {
    /// Send an inquiry before check-device and refuse to start while printing.
    pub inquire_first: bool,
    /// Refuse to start when the device is already printing after the fault check.
    pub reject_printing_at_start: bool,
    pub check_param: CheckParam,
    pub start_param: StartParam,
    pub print_active: PrintActive,
    /// Poll until the buffer is free before each page header. `None` sends at once.
    pub header_poll: Option<Poll>,
    /// Bulk pixel data is acknowledged by a status reply.
    pub matrix_ack: bool,
    /// Wait after unacknowledged bulk data before the commit.
    pub matrix_settle: Duration,
    pub commit: CommitFrame,
    /// The commit only goes out when at least one bulk frame was sent.
    pub commit_requires_data: bool,
    pub next_gate: NextGate,
    /// Fail as interrupted when the buffer stays full but printing stopped.
    pub abort_when_stalled: bool,
    /// Finish once the device page counter reaches the target.
    pub end_on_page_count: bool,
    /// Hold the transport open until the device stops printing.
    pub wait_release: bool,
    /// Inspect printing state before sending stop.
    pub stop_precheck: bool,
    pub speed: SpeedRule,
}

/// Retry budgets and delays of a family.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub command_ready: Poll,
    pub print_start: Poll,
    pub matrix_retry: Poll,
    pub commit_retry: Poll,
    pub next_page: Poll,
    pub page_wait: Poll,
    /// Delay between a page commit and the next page header.
    pub page_gap: Duration,
    pub stop_check: Poll,
    pub stop_wait: Poll,
    pub stop_release: Poll,
    pub release: Poll,
    /// Missing or malformed replies tolerated per command.
    pub reply_retries: u8,
}

/// Everything the engine needs to know about one device family.
#[derive(Debug)]
pub struct Profile {
    pub family: Family,
    pub name: &'static str,
    pub opcodes: Opcodes,
    pub layout: &'static [BitMap],
    /// Evaluated in order; the first fatal hit wins.
    pub faults: &'static [FaultRule],
    /// Maps a job's paper type to the family's material code.
    pub material_code: fn(u8) -> u16,
    pub flow: Flow,
    pub timing: Timing,
}

impl Profile {
    /// Severity of `code` in this family, if the family reports it.
    pub fn severity(&self, code: FaultCode) -> Option<Severity> {
        self.faults
            .iter()
            .find(|rule| rule.code == code)
            .map(|rule| rule.severity)
    }
}

/// Paper type codes used by job parameters.
pub mod paper {
    pub const CONTINUOUS: u8 = 1;
    pub const DIE_CUT: u8 = 2;
    pub const PLATE: u8 = 3;
}

/// Families that do not encode a material code.
pub(crate) fn no_material(_paper_type: u8) -> u16 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Signal;

    #[test]
    fn test_family_round_trip_names() {
        for family in Family::ALL {
            assert_eq!(family.as_str().parse::<Family>().ok(), Some(family));
            assert_eq!(family.profile().family, family);
        }
        assert!("zz".parse::<Family>().is_err());
    }

    #[test]
    fn test_every_fault_rule_is_decodable() {
        for family in Family::ALL {
            let profile = family.profile();
            for rule in profile.faults {
                let mapped = profile.layout.iter().any(|bit| {
                    matches!(bit.signal, Signal::Fault(c) | Signal::FaultWhenClear(c) if c == rule.code)
                });
                assert!(mapped, "{} has no bit for {:?}", profile.name, rule.code);
            }
        }
    }

    #[test]
    fn test_every_layout_has_core_signals() {
        for family in Family::ALL {
            let layout = family.profile().layout;
            for want in [Signal::Printing, Signal::BufferFull, Signal::CommandBusy] {
                assert!(
                    layout.iter().any(|b| b.signal == want),
                    "{family} lacks {want:?}"
                );
            }
        }
    }

    #[test]
    fn test_layout_bits_do_not_collide() {
        for family in Family::ALL {
            let layout = family.profile().layout;
            for (i, a) in layout.iter().enumerate() {
                for b in &layout[i + 1..] {
                    assert!(
                        a.word != b.word || a.mask & b.mask == 0,
                        "{family}: {a:?} collides with {b:?}"
                    );
                }
            }
        }
    }
}
