//! T5080 family: label printers with an embedded radio tag writer.

use std::time::Duration;

use super::{
    CheckParam, CommitFrame, FaultRule, Family, Flow, MaterialReadback, NextGate, Opcodes, Poll,
    PrintActive, Profile, SpeedRule, StartParam, Timing, no_material,
};
use crate::status::{BitMap, FaultCode, Signal};

const LAYOUT: &[BitMap] = &[
    BitMap::main(0x0001, Signal::BufferFull),
    BitMap::main(0x0002, Signal::Fault(FaultCode::MediaMissing)),
    BitMap::main(0x0004, Signal::Fault(FaultCode::MediaExhausted)),
    BitMap::main(0x0008, Signal::Fault(FaultCode::MediaUnrecognized)),
    BitMap::main(0x0040, Signal::Fault(FaultCode::LowBattery)),
    BitMap::main(0x0080, Signal::Fault(FaultCode::CheckMediaRemaining)),
    BitMap::main(0x0400, Signal::CommandBusy),
    BitMap::main(0x0800, Signal::Fault(FaultCode::HeadOverheat)),
    BitMap::func(0x0008, Signal::Fault(FaultCode::CoverOpen)),
    BitMap::func(0x0040, Signal::Printing),
    BitMap::func(0x0100, Signal::Fault(FaultCode::MediaMisaligned)),
];

const FAULTS: &[FaultRule] = &[
    FaultRule::fatal(FaultCode::CoverOpen),
    FaultRule::fatal(FaultCode::MediaMisaligned),
    FaultRule::fatal(FaultCode::MediaMissing),
    FaultRule::advisory(FaultCode::MediaUnrecognized),
    FaultRule::fatal(FaultCode::MediaExhausted),
    FaultRule::advisory(FaultCode::LowBattery),
    FaultRule::advisory(FaultCode::CheckMediaRemaining),
    FaultRule::fatal(FaultCode::HeadOverheat),
];

pub static PROFILE: Profile = Profile {
    family: Family::T5080,
    name: "T5080",
    opcodes: Opcodes {
        inquiry: 17,
        check_device: 18,
        start_print: 19,
        stop_print: 20,
        next_frame: 92,
        buffer_full: 16,
        set_material: None,
        read_dpi: None,
        read_material: Some(MaterialReadback::Extended(48)),
        tag_set: Some(93),
    },
    layout: LAYOUT,
    faults: FAULTS,
    material_code: no_material,
    flow: Flow {
        inquire_first: false,
        reject_printing_at_start: true,
        check_param: CheckParam::Zero,
        start_param: StartParam::Fixed(1),
        print_active: PrintActive::Immediate,
        header_poll: Some(Poll::new(200, 5)),
        matrix_ack: true,
        matrix_settle: Duration::ZERO,
        commit: CommitFrame::WithSpeed,
        commit_requires_data: false,
        next_gate: NextGate::BufferFree,
        abort_when_stalled: true,
        end_on_page_count: true,
        wait_release: true,
        stop_precheck: true,
        speed: SpeedRule::ByBatchSize {
            multi: 20,
            single: 60,
        },
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Severity;
    use crate::status::DeviceStatus;

    #[test]
    fn test_advisories() {
        for code in [
            FaultCode::MediaUnrecognized,
            FaultCode::LowBattery,
            FaultCode::CheckMediaRemaining,
        ] {
            assert_eq!(PROFILE.severity(code), Some(Severity::Advisory));
        }
        assert_eq!(PROFILE.severity(FaultCode::HeadOverheat), Some(Severity::Fatal));
        assert_eq!(PROFILE.severity(FaultCode::RibbonBroken), None);
    }

    #[test]
    fn test_cover_open_and_printing_in_function_word() {
        let status = DeviceStatus::decode(&[0, 0, 0x48, 0, 0, 0, 0, 0], PROFILE.layout);
        assert!(status.printing);
        assert!(status.has(FaultCode::CoverOpen));
    }
}
