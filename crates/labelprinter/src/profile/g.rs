//! G family: handheld label printers with smart consumables.

use std::time::Duration;

use super::{
    CheckParam, CommitFrame, FaultRule, Family, Flow, MaterialReadback, NextGate, Opcodes, Poll,
    PrintActive, Profile, SpeedRule, StartParam, Timing, no_material,
};
use crate::status::{BitMap, FaultCode, Signal};

const LAYOUT: &[BitMap] = &[
    BitMap::main(0x0001, Signal::BufferFull),
    BitMap::main(0x0002, Signal::Fault(FaultCode::MediaReadWrite)),
    BitMap::main(0x0004, Signal::Fault(FaultCode::MediaExhausted)),
    BitMap::main(0x0008, Signal::Fault(FaultCode::MediaUnrecognized)),
    // fixing error and optical detection error report the same condition
    BitMap::main(0x0030, Signal::Fault(FaultCode::MediaMisaligned)),
    BitMap::main(0x0040, Signal::Fault(FaultCode::LowBattery)),
    BitMap::main(0x0400, Signal::CommandBusy),
    BitMap::main(0x1000, Signal::Fault(FaultCode::OperationError)),
    BitMap::func(0x0008, Signal::Fault(FaultCode::CoverOpen)),
    BitMap::func(0x0040, Signal::Printing),
    BitMap::func(0x0100, Signal::Fault(FaultCode::MediaMissing)),
];

const FAULTS: &[FaultRule] = &[
    FaultRule::fatal(FaultCode::LowBattery),
    FaultRule::fatal(FaultCode::MediaMissing),
    FaultRule::fatal(FaultCode::MediaUnrecognized),
    FaultRule::fatal(FaultCode::CoverOpen),
    FaultRule::fatal(FaultCode::MediaExhausted),
    FaultRule::fatal(FaultCode::MediaMisaligned),
    FaultRule::fatal(FaultCode::OperationError),
    FaultRule::fatal(FaultCode::MediaReadWrite),
];

pub static PROFILE: Profile = Profile {
    family: Family::G,
    name: "G",
    opcodes: Opcodes {
        inquiry: 17,
        check_device: 18,
        start_print: 19,
        stop_print: 20,
        next_frame: 92,
        buffer_full: 16,
        set_material: None,
        read_dpi: None,
        read_material: Some(MaterialReadback::Short(48)),
        tag_set: None,
    },
    layout: LAYOUT,
    faults: FAULTS,
    material_code: no_material,
    flow: Flow {
        inquire_first: true,
        reject_printing_at_start: false,
        check_param: CheckParam::Zero,
        start_param: StartParam::Fixed(0),
        print_active: PrintActive::Printing,
        header_poll: Some(Poll::new(50, 100)),
        matrix_ack: true,
        matrix_settle: Duration::ZERO,
        commit: CommitFrame::WithSpeed,
        commit_requires_data: false,
        next_gate: NextGate::BufferFree,
        abort_when_stalled: true,
        end_on_page_count: true,
        wait_release: true,
        stop_precheck: true,
        speed: SpeedRule::FromParams,
    },
    timing: Timing {
        command_ready: Poll::new(20, 500),
        print_start: Poll::new(20, 500),
        matrix_retry: Poll::new(50, 200),
        commit_retry: Poll::new(50, 100),
        next_page: Poll::new(50, 50),
        page_wait: Poll::new(20, 500),
        page_gap: Duration::from_millis(100),
        stop_check: Poll::new(20, 500),
        stop_wait: Poll::new(50, 500),
        stop_release: Poll::new(20, 200),
        release: Poll::new(120, 500),
        reply_retries: 3,
    },
};
