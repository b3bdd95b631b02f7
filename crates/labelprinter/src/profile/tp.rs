//! TP family (and its TP-B variant): thermal transfer printers with a cutter.
//!
//! TP-B shares the status layout and fault table. It differs in the
//! next-frame opcode, sends the page length with the commit, and skips
//! the header poll.

use std::time::Duration;

use super::{
    CheckParam, CommitFrame, DpiReadback, FaultRule, Family, Flow, NextGate, Opcodes, Poll,
    PrintActive, Profile, SpeedRule, StartParam, Timing,
};
use crate::status::{BitMap, FaultCode, Signal};

const LAYOUT: &[BitMap] = &[
    BitMap::main(0x0001, Signal::BufferFull),
    BitMap::main(0x0002, Signal::Fault(FaultCode::RibbonRead)),
    BitMap::main(0x0004, Signal::Fault(FaultCode::MediaNotAtInlet)),
    BitMap::main(0x0008, Signal::Fault(FaultCode::LabelRead)),
    BitMap::main(0x0010, Signal::Fault(FaultCode::RibbonBroken)),
    BitMap::main(0x0020, Signal::Fault(FaultCode::RibbonExhausted)),
    BitMap::main(0x0040, Signal::Fault(FaultCode::LabelExhausted)),
    BitMap::main(0x0400, Signal::CommandBusy),
    BitMap::func(0x0001, Signal::Printing),
    BitMap::func(0x0002, Signal::Fault(FaultCode::CoverOpen)),
    BitMap::func(0x0004, Signal::Fault(FaultCode::RibbonMissing)),
    BitMap::func(0x0008, Signal::Fault(FaultCode::LabelExhausted)),
    BitMap::func(0x0010, Signal::Fault(FaultCode::LabelRead)),
    BitMap::func(0x0020, Signal::Fault(FaultCode::CutterError)),
    BitMap::func(0x0080, Signal::Fault(FaultCode::NeedsAuthentication)),
];

const FAULTS: &[FaultRule] = &[
    FaultRule::fatal(FaultCode::CoverOpen),
    FaultRule::fatal(FaultCode::RibbonMissing),
    FaultRule::fatal(FaultCode::LabelExhausted),
    FaultRule::fatal(FaultCode::LabelRead),
    FaultRule::fatal(FaultCode::CutterError),
    FaultRule::fatal(FaultCode::RibbonRead),
    FaultRule::fatal(FaultCode::MediaNotAtInlet),
    FaultRule::fatal(FaultCode::RibbonBroken),
    FaultRule::fatal(FaultCode::RibbonExhausted),
    FaultRule::fatal(FaultCode::NeedsAuthentication),
];

/// The device takes the paper type as its material code.
fn material_code(paper_type: u8) -> u16 {
    u16::from(paper_type)
}

const OPCODES: Opcodes = Opcodes {
    inquiry: 17,
    check_device: 18,
    start_print: 19,
    stop_print: 20,
    next_frame: 90,
    buffer_full: 16,
    set_material: None,
    read_dpi: Some(DpiReadback::PaperTyped(34)),
    read_material: None,
    tag_set: None,
};

const FLOW: Flow = Flow {
    inquire_first: false,
    reject_printing_at_start: false,
    check_param: CheckParam::MaterialAndCut,
    start_param: StartParam::Density,
    print_active: PrintActive::Printing,
    header_poll: Some(Poll::new(50, 2)),
    matrix_ack: false,
    matrix_settle: Duration::from_millis(100),
    commit: CommitFrame::Plain,
    commit_requires_data: true,
    next_gate: NextGate::BufferFree,
    abort_when_stalled: false,
    end_on_page_count: false,
    wait_release: false,
    stop_precheck: false,
    speed: SpeedRule::FromParams,
};

const TIMING: Timing = Timing {
    command_ready: Poll::new(20, 500),
    print_start: Poll::new(20, 500),
    matrix_retry: Poll::new(50, 200),
    commit_retry: Poll::new(50, 10),
    next_page: Poll::new(50, 500),
    page_wait: Poll::new(300, 500),
    page_gap: Duration::from_millis(10),
    stop_check: Poll::new(20, 500),
    stop_wait: Poll::new(50, 500),
    stop_release: Poll::new(20, 200),
    release: Poll::new(120, 500),
    reply_retries: 3,
};

pub static PROFILE: Profile = Profile {
    family: Family::Tp,
    name: "TP",
    opcodes: OPCODES,
    layout: LAYOUT,
    faults: FAULTS,
    material_code,
    flow: FLOW,
    timing: TIMING,
};

pub static PROFILE_B: Profile = Profile {
    family: Family::TpB,
    name: "TP-B",
    opcodes: Opcodes {
        next_frame: 92,
        ..OPCODES
    },
    layout: LAYOUT,
    faults: FAULTS,
    material_code,
    flow: Flow {
        print_active: PrintActive::CommandIdle,
        header_poll: None,
        matrix_settle: Duration::from_millis(50),
        commit: CommitFrame::PageLength,
        ..FLOW
    },
    timing: Timing {
        commit_retry: Poll::new(50, 200),
        page_gap: Duration::from_millis(100),
        ..TIMING
    },
};
