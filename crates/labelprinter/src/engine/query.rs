//! Readback parsing for DPI and material queries.

use crate::outcome::MaterialInfo;
use crate::profile::{DpiReadback, MaterialReadback, paper};
use crate::status::DeviceStatus;

/// Fallback when the device reports an implausible value.
pub const DEFAULT_DPI: f32 = 11.8;

/// Fixed DPI of TP paper type 8.
const TP_TYPE8_DPI: f32 = 11.606;

/// Opcode to send for a DPI query with the given paper type.
pub(crate) fn dpi_opcode(readback: DpiReadback, paper_type: u8) -> u8 {
    match readback {
        DpiReadback::DotRatio { plate, other } => {
            if paper_type == paper::PLATE {
                plate
            } else {
                other
            }
        }
        DpiReadback::PaperTyped(opcode) => opcode,
    }
}

/// Decode a DPI reading, clamping implausible values to [`DEFAULT_DPI`].
pub(crate) fn parse_dpi(readback: DpiReadback, status: &DeviceStatus, paper_type: u8) -> f32 {
    let e = &status.block;
    match readback {
        DpiReadback::DotRatio { .. } => {
            let dpi = 672.0 / (f32::from(status.send_data) / 10.0);
            if (11.0..=12.0).contains(&dpi) {
                dpi
            } else {
                DEFAULT_DPI
            }
        }
        DpiReadback::PaperTyped(_) => {
            let raw = match paper_type {
                0 => Some(u16::from_le_bytes([e[2], e[3]])),
                6 => Some(u16::from_le_bytes([e[0], e[1]])),
                7 => Some(u16::from_le_bytes([e[4], e[5]])),
                _ => None,
            };
            let dpi = match (paper_type, raw) {
                (_, Some(raw)) => f32::from(raw) / 100.0,
                (8, None) => TP_TYPE8_DPI,
                _ => DEFAULT_DPI,
            };
            if (11.0..=12.8).contains(&dpi) {
                dpi
            } else {
                DEFAULT_DPI
            }
        }
    }
}

/// Decode a material-info reply. `reply` is the raw report, byte 0 included.
///
/// Returns `None` when the reply is too short or reports no consumable.
pub(crate) fn parse_material(layout: MaterialReadback, reply: &[u8]) -> Option<MaterialInfo> {
    match layout {
        MaterialReadback::Short(_) => {
            let serial = u16::from_le_bytes([*reply.get(31)?, *reply.get(32)?]);
            if serial == 0 {
                return None;
            }
            Some(MaterialInfo {
                serial,
                device_serial: ascii_until_nul(reply.get(11..32)?),
                label_serial: Some(format!("118{serial:03}")),
                ..MaterialInfo::default()
            })
        }
        MaterialReadback::Extended(_) => {
            let serial = u16::from_le_bytes([*reply.get(16)?, *reply.get(17)?]);
            let uuid = uuid_hex(reply.get(1..8)?);
            Some(MaterialInfo {
                serial,
                device_serial: ascii_until_nul(reply.get(40..56)?),
                label_serial: None,
                custom: uuid.ends_with("000000"),
                uuid: Some(uuid),
                gap: Some(*reply.get(21)?),
                paper_type: Some(*reply.get(18)?),
            })
        }
    }
}

fn ascii_until_nul(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect()
}

/// Hex of the uuid bytes up to the first zero, right-padded with '0' to 14.
fn uuid_hex(bytes: &[u8]) -> String {
    let mut out: String = bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| format!("{b:02x}"))
        .collect();
    while out.len() < 14 {
        out.push('0');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Family;

    fn status_with(block: [u8; 8]) -> DeviceStatus {
        DeviceStatus::decode(&block, Family::Sp.profile().layout)
    }

    #[test]
    fn test_dot_ratio_dpi() {
        let readback = DpiReadback::DotRatio { plate: 36, other: 37 };
        // 672 / 57.6 = 11.666..
        let status = status_with([0, 0, 0, 0, 0, 0, 0x40, 0x02]);
        let dpi = parse_dpi(readback, &status, paper::CONTINUOUS);
        assert!((dpi - 11.666_667).abs() < 1e-3);

        let zero = status_with([0u8; 8]);
        assert_eq!(parse_dpi(readback, &zero, paper::CONTINUOUS), DEFAULT_DPI);
    }

    #[test]
    fn test_dpi_opcode_by_paper() {
        let readback = DpiReadback::DotRatio { plate: 36, other: 37 };
        assert_eq!(dpi_opcode(readback, paper::PLATE), 36);
        assert_eq!(dpi_opcode(readback, paper::DIE_CUT), 37);
        assert_eq!(dpi_opcode(DpiReadback::PaperTyped(34), 6), 34);
    }

    #[test]
    fn test_paper_typed_offsets() {
        let readback = DpiReadback::PaperTyped(34);
        // 1180 = 0x049C, 1200 = 0x04B0, 1250 = 0x04E2
        let status = status_with([0xB0, 0x04, 0x9C, 0x04, 0xE2, 0x04, 0, 0]);
        assert_eq!(parse_dpi(readback, &status, 0), 11.8);
        assert_eq!(parse_dpi(readback, &status, 6), 12.0);
        assert_eq!(parse_dpi(readback, &status, 7), 12.5);
        assert_eq!(parse_dpi(readback, &status, 8), TP_TYPE8_DPI);
        assert_eq!(parse_dpi(readback, &status_with([0u8; 8]), 6), DEFAULT_DPI);
    }

    #[test]
    fn test_short_material_layout() {
        let mut reply = vec![0u8; 64];
        reply[11..16].copy_from_slice(b"G1234");
        reply[31] = 7;
        let info = parse_material(MaterialReadback::Short(48), &reply).unwrap();
        assert_eq!(info.serial, 7);
        assert_eq!(info.device_serial, "G1234");
        assert_eq!(info.label_serial.as_deref(), Some("118007"));

        reply[31] = 0;
        assert!(parse_material(MaterialReadback::Short(48), &reply).is_none());
    }

    #[test]
    fn test_extended_material_layout() {
        let mut reply = vec![0u8; 64];
        reply[1..4].copy_from_slice(&[0xAB, 0x01, 0xFF]);
        reply[16] = 0x2C;
        reply[17] = 0x01;
        reply[18] = 2;
        reply[21] = 3;
        reply[40..44].copy_from_slice(b"T508");
        let info = parse_material(MaterialReadback::Extended(48), &reply).unwrap();
        assert_eq!(info.serial, 300);
        assert_eq!(info.uuid.as_deref(), Some("ab01ff00000000"));
        assert!(info.custom);
        assert_eq!(info.gap, Some(3));
        assert_eq!(info.paper_type, Some(2));
        assert_eq!(info.device_serial, "T508");
    }

    #[test]
    fn test_short_reply_is_rejected() {
        assert!(parse_material(MaterialReadback::Extended(48), &[0u8; 20]).is_none());
    }
}
