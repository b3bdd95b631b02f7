//! SP family: ribbon-based desktop printers with a cleaning unit.

use std::time::Duration;

use super::{
    CheckParam, CommitFrame, DpiReadback, FaultRule, Family, Flow, NextGate, Opcodes, Poll,
    PrintActive, Profile, SpeedRule, StartParam, Timing, paper,
};
use crate::status::{BitMap, FaultCode, Signal};

const LAYOUT: &[BitMap] = &[
    BitMap::main(0x0001, Signal::BufferFull),
    BitMap::main(0x0002, Signal::Fault(FaultCode::RibbonReadWrite)),
    BitMap::main(0x0004, Signal::Fault(FaultCode::RibbonExhausted)),
    BitMap::main(0x0008, Signal::Fault(FaultCode::RibbonUnrecognized)),
    BitMap::main(0x0010, Signal::FaultWhenClear(FaultCode::RibbonCheck)),
    BitMap::main(0x0020, Signal::Fault(FaultCode::NeedsCleaning)),
    BitMap::main(0x0300, Signal::Fault(FaultCode::SystemError)),
    BitMap::main(0x0400, Signal::CommandBusy),
    BitMap::func(0x0001, Signal::Printing),
    BitMap::func(0x0002, Signal::Fault(FaultCode::CoverOpen)),
    BitMap::func(0x0004, Signal::Fault(FaultCode::RibbonExhausted)),
    BitMap::func(0x0008, Signal::Fault(FaultCode::LabelExhausted)),
    BitMap::func(0x0010, Signal::Fault(FaultCode::HeadFault)),
    BitMap::func(0x0020, Signal::Fault(FaultCode::CleanerFault)),
];

const FAULTS: &[FaultRule] = &[
    FaultRule::fatal(FaultCode::RibbonExhausted),
    FaultRule::advisory(FaultCode::RibbonCheck),
    FaultRule::advisory(FaultCode::RibbonReadWrite),
    FaultRule::advisory(FaultCode::RibbonUnrecognized),
    FaultRule::fatal(FaultCode::SystemError),
    FaultRule::fatal(FaultCode::CoverOpen),
    FaultRule::fatal(FaultCode::LabelExhausted),
    FaultRule::fatal(FaultCode::HeadFault),
    FaultRule::fatal(FaultCode::CleanerFault),
    FaultRule::fatal(FaultCode::NeedsCleaning),
];

/// Continuous, die-cut and plate map to themselves; anything else is continuous.
fn material_code(paper_type: u8) -> u16 {
    match paper_type {
        paper::CONTINUOUS | paper::DIE_CUT | paper::PLATE => u16::from(paper_type),
        _ => u16::from(paper::CONTINUOUS),
    }
}

pub static PROFILE: Profile = Profile {
    family: Family::Sp,
    name: "SP",
    opcodes: Opcodes {
        inquiry: 18,
        check_device: 24,
        start_print: 19,
        stop_print: 20,
        next_frame: 92,
        buffer_full: 16,
        set_material: Some(26),
        read_dpi: Some(DpiReadback::DotRatio {
            plate: 36,
            other: 37,
        }),
        read_material: None,
        tag_set: None,
    },
    layout: LAYOUT,
    faults: FAULTS,
    material_code,
    flow: Flow {
        inquire_first: false,
        reject_printing_at_start: false,
        check_param: CheckParam::Zero,
        start_param: StartParam::MaterialCode,
        print_active: PrintActive::Printing,
        header_poll: Some(Poll::new(50, 100)),
        matrix_ack: true,
        matrix_settle: Duration::ZERO,
        commit: CommitFrame::Plain,
        commit_requires_data: false,
        next_gate: NextGate::PageCounter,
        abort_when_stalled: true,
        end_on_page_count: false,
        wait_release: false,
        stop_precheck: false,
        speed: SpeedRule::FromParams,
    },
    timing: Timing {
        command_ready: Poll::new(20, 500),
        print_start: Poll::new(50, 100),
        matrix_retry: Poll::new(50, 200),
        commit_retry: Poll::new(50, 200),
        next_page: Poll::new(50, 100),
        page_wait: Poll::new(100, 500),
        page_gap: Duration::from_millis(100),
        stop_check: Poll::new(20, 500),
        stop_wait: Poll::new(50, 500),
        stop_release: Poll::new(20, 200),
        release: Poll::new(120, 500),
        reply_retries: 3,
    },
};
