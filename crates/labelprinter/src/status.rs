//! Status register decode.
//!
//! A status reply carries an 8-byte block at offsets 1..=8. It holds two
//! 16-bit status words (main and function), a page counter and a trailing
//! numeric field, all low byte first. Which bit means what is profile data.

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

/// Size of the status block inside a reply report.
pub const STATUS_BLOCK_LEN: usize = 8;

/// Hardware conditions a family can report. Not every family reports all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    CoverOpen,
    LowBattery,
    MediaMissing,
    MediaUnrecognized,
    MediaExhausted,
    MediaMisaligned,
    MediaReadWrite,
    OperationError,
    CheckMediaRemaining,
    LabelExhausted,
    LabelRead,
    MediaNotAtInlet,
    RibbonMissing,
    RibbonExhausted,
    RibbonCheck,
    RibbonReadWrite,
    RibbonUnrecognized,
    RibbonRead,
    RibbonBroken,
    CutterError,
    HeadFault,
    HeadOverheat,
    SystemError,
    CleanerFault,
    NeedsCleaning,
    NeedsAuthentication,
}

bitflags! {
    /// Set of [`FaultCode`]s raised by one status block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Faults: u32 {
        const COVER_OPEN = 1 << 0;
        const LOW_BATTERY = 1 << 1;
        const MEDIA_MISSING = 1 << 2;
        const MEDIA_UNRECOGNIZED = 1 << 3;
        const MEDIA_EXHAUSTED = 1 << 4;
        const MEDIA_MISALIGNED = 1 << 5;
        const MEDIA_READ_WRITE = 1 << 6;
        const OPERATION_ERROR = 1 << 7;
        const CHECK_MEDIA_REMAINING = 1 << 8;
        const LABEL_EXHAUSTED = 1 << 9;
        const LABEL_READ = 1 << 10;
        const MEDIA_NOT_AT_INLET = 1 << 11;
        const RIBBON_MISSING = 1 << 12;
        const RIBBON_EXHAUSTED = 1 << 13;
        const RIBBON_CHECK = 1 << 14;
        const RIBBON_READ_WRITE = 1 << 15;
        const RIBBON_UNRECOGNIZED = 1 << 16;
        const RIBBON_READ = 1 << 17;
        const RIBBON_BROKEN = 1 << 18;
        const CUTTER_ERROR = 1 << 19;
        const HEAD_FAULT = 1 << 20;
        const HEAD_OVERHEAT = 1 << 21;
        const SYSTEM_ERROR = 1 << 22;
        const CLEANER_FAULT = 1 << 23;
        const NEEDS_CLEANING = 1 << 24;
        const NEEDS_AUTHENTICATION = 1 << 25;
    }
}

impl FaultCode {
    /// The bit this code occupies in a [`Faults`] set.
    pub const fn flag(self) -> Faults {
        match self {
            Self::CoverOpen => Faults::COVER_OPEN,
            Self::LowBattery => Faults::LOW_BATTERY,
            Self::MediaMissing => Faults::MEDIA_MISSING,
            Self::MediaUnrecognized => Faults::MEDIA_UNRECOGNIZED,
            Self::MediaExhausted => Faults::MEDIA_EXHAUSTED,
            Self::MediaMisaligned => Faults::MEDIA_MISALIGNED,
            Self::MediaReadWrite => Faults::MEDIA_READ_WRITE,
            Self::OperationError => Faults::OPERATION_ERROR,
            Self::CheckMediaRemaining => Faults::CHECK_MEDIA_REMAINING,
            Self::LabelExhausted => Faults::LABEL_EXHAUSTED,
            Self::LabelRead => Faults::LABEL_READ,
            Self::MediaNotAtInlet => Faults::MEDIA_NOT_AT_INLET,
            Self::RibbonMissing => Faults::RIBBON_MISSING,
            Self::RibbonExhausted => Faults::RIBBON_EXHAUSTED,
            Self::RibbonCheck => Faults::RIBBON_CHECK,
            Self::RibbonReadWrite => Faults::RIBBON_READ_WRITE,
            Self::RibbonUnrecognized => Faults::RIBBON_UNRECOGNIZED,
            Self::RibbonRead => Faults::RIBBON_READ,
            Self::RibbonBroken => Faults::RIBBON_BROKEN,
            Self::CutterError => Faults::CUTTER_ERROR,
            Self::HeadFault => Faults::HEAD_FAULT,
            Self::HeadOverheat => Faults::HEAD_OVERHEAT,
            Self::SystemError => Faults::SYSTEM_ERROR,
            Self::CleanerFault => Faults::CLEANER_FAULT,
            Self::NeedsCleaning => Faults::NEEDS_CLEANING,
            Self::NeedsAuthentication => Faults::NEEDS_AUTHENTICATION,
        }
    }

    /// Human-facing description.
    pub const fn message(self) -> &'static str {
        match self {
            Self::CoverOpen => "cover is open",
            Self::LowBattery => "battery low, please charge",
            Self::MediaMissing => "no label detected, please install labels",
            Self::MediaUnrecognized => "label not recognized",
            Self::MediaExhausted => "labels used up, please replace",
            Self::MediaMisaligned => "label not installed correctly",
            Self::MediaReadWrite => "consumable error",
            Self::OperationError => "improper operation, printing stopped",
            Self::CheckMediaRemaining => "please check remaining labels",
            Self::LabelExhausted => "sticker paper used up",
            Self::LabelRead => "sticker paper read error",
            Self::MediaNotAtInlet => "no material detected at inlet",
            Self::RibbonMissing => "ribbon not detected",
            Self::RibbonExhausted => "ribbon used up",
            Self::RibbonCheck => "ribbon check failed",
            Self::RibbonReadWrite => "ribbon read/write error",
            Self::RibbonUnrecognized => "ribbon not recognized",
            Self::RibbonRead => "ribbon read error",
            Self::RibbonBroken => "ribbon broken",
            Self::CutterError => "cutter error",
            Self::HeadFault => "print head fault",
            Self::HeadOverheat => "print head temperature too high",
            Self::SystemError => "internal system error",
            Self::CleanerFault => "cleaning unit fault",
            Self::NeedsCleaning => "cleaning roller needs cleaning",
            Self::NeedsAuthentication => "device needs authentication, reconnect to network and restart",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Which status word a bit lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    /// `e[1] << 8 | e[0]`
    Main,
    /// `e[3] << 8 | e[2]`
    Func,
}

/// What a set (or clear) status bit means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Printing,
    BufferFull,
    CommandBusy,
    Fault(FaultCode),
    /// Raised when the bit is clear (an "ok" bit).
    FaultWhenClear(FaultCode),
}

/// One entry of a family's status-bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitMap {
    pub word: Word,
    pub mask: u16,
    pub signal: Signal,
}

impl BitMap {
    pub const fn main(mask: u16, signal: Signal) -> Self {
        Self {
            word: Word::Main,
            mask,
            signal,
        }
    }

    pub const fn func(mask: u16, signal: Signal) -> Self {
        Self {
            word: Word::Func,
            mask,
            signal,
        }
    }
}

/// Extract the status block from a raw reply report.
///
/// Returns `None` when the reply is too short to carry one.
pub fn status_block(reply: &[u8]) -> Option<[u8; STATUS_BLOCK_LEN]> {
    reply
        .get(1..=STATUS_BLOCK_LEN)
        .and_then(|s| s.try_into().ok())
}

/// Immutable snapshot decoded from one status block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub main_word: u16,
    pub func_word: u16,
    pub printing: bool,
    pub buffer_full: bool,
    pub command_busy: bool,
    pub page_count: u16,
    /// Trailing numeric field (DPI readback, material echo).
    pub send_data: u16,
    pub faults: Faults,
    pub block: [u8; STATUS_BLOCK_LEN],
}

impl DeviceStatus {
    /// Decode a status block against a family layout. Never fails.
    pub fn decode(block: &[u8; STATUS_BLOCK_LEN], layout: &[BitMap]) -> Self {
        let main_word = u16::from_le_bytes([block[0], block[1]]);
        let func_word = u16::from_le_bytes([block[2], block[3]]);
        let mut status = Self {
            main_word,
            func_word,
            page_count: u16::from_le_bytes([block[4], block[5]]),
            send_data: u16::from_le_bytes([block[6], block[7]]),
            block: *block,
            ..Self::default()
        };

        for bit in layout {
            let word = match bit.word {
                Word::Main => main_word,
                Word::Func => func_word,
            };
            let set = word & bit.mask != 0;
            match bit.signal {
                Signal::Printing => status.printing |= set,
                Signal::BufferFull => status.buffer_full |= set,
                Signal::CommandBusy => status.command_busy |= set,
                Signal::Fault(code) if set => status.faults |= code.flag(),
                Signal::FaultWhenClear(code) if !set => status.faults |= code.flag(),
                Signal::Fault(_) | Signal::FaultWhenClear(_) => {}
            }
        }
        status
    }

    /// Whether `code` is raised in this snapshot.
    pub fn has(&self, code: FaultCode) -> bool {
        self.faults.contains(code.flag())
    }
}
