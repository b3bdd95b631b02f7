//! Frame codec: 8-byte command frames and 64-byte bulk frames.
//!
//! Command layout: `[0xC0, 0x40, param_hi, param_lo, opcode, 0x00, 0x08, 0x00]`.
//! The two-parameter variant appends `[param2_hi, param2_lo]`.

use crate::REPORT_SIZE;

/// Command frame header bytes.
const HEADER: [u8; 2] = [0xC0, 0x40];

/// Length byte carried in slot 6 of every command frame.
const COMMAND_LEN: u8 = 0x08;

/// Bulk chunk size in bytes.
pub const CHUNK_SIZE: usize = REPORT_SIZE;

/// Build an 8-byte command frame.
pub fn build_command_frame(opcode: u8, param: u16) -> [u8; 8] {
    let [hi, lo] = param.to_be_bytes();
    [HEADER[0], HEADER[1], hi, lo, opcode, 0x00, COMMAND_LEN, 0x00]
}

/// Build a 10-byte command frame carrying a second 16-bit parameter.
///
/// Used by the buffer-full handshake on families that pass the print
/// speed alongside the page length.
pub fn build_command_frame_two(opcode: u8, param: u16, param2: u16) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[..8].copy_from_slice(&build_command_frame(opcode, param));
    out[8..].copy_from_slice(&param2.to_be_bytes());
    out
}

/// Copy a frame into a zero-padded HID output report.
pub fn pad_report(frame: &[u8]) -> [u8; REPORT_SIZE] {
    let mut report = [0u8; REPORT_SIZE];
    let n = frame.len().min(REPORT_SIZE);
    report[..n].copy_from_slice(&frame[..n]);
    report
}

/// Number of bulk frames a payload of `len` bytes occupies.
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

/// Split a payload into zero-padded 64-byte bulk frames.
///
/// The sequence is lazy. It walks `len / 64 + 1` candidate frames and stops
/// at the first candidate that starts at or beyond the payload end, so a
/// payload whose length is an exact multiple of 64 gets no trailing
/// all-zero frame and an empty payload yields nothing.
pub fn chunk_bulk_payload(payload: &[u8]) -> BulkChunks<'_> {
    BulkChunks {
        payload,
        index: 0,
        candidates: payload.len() / CHUNK_SIZE + 1,
    }
}

/// Iterator returned by [`chunk_bulk_payload`].
#[derive(Debug, Clone)]
pub struct BulkChunks<'a> {
    payload: &'a [u8],
    index: usize,
    candidates: usize,
}

impl Iterator for BulkChunks<'_> {
    type Item = [u8; CHUNK_SIZE];

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.candidates {
            return None;
        }
        let start = self.index * CHUNK_SIZE;
        if start >= self.payload.len() {
            self.index = self.candidates;
            return None;
        }
        self.index += 1;
        let end = (start + CHUNK_SIZE).min(self.payload.len());
        Some(pad_report(&self.payload[start..end]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let consumed = (self.index * CHUNK_SIZE).min(self.payload.len());
        let left = chunk_count(self.payload.len() - consumed);
        (left, Some(left))
    }
}

impl ExactSizeIterator for BulkChunks<'_> {}
