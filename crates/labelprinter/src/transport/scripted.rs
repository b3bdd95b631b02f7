use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::Transport;
use crate::codec::chunk_count;
use crate::profile::Profile;
use crate::status::{FaultCode, Signal, Word};
use crate::{LabelPrinterError, REPORT_SIZE, Result};

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Shared view of every report written to a [`ScriptedTransport`].
#[derive(Debug, Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl WriteLog {
    fn push(&self, report: Vec<u8>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }

    /// Copy of all reports written so far, in order.
    pub fn reports(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Opcodes of the command frames written so far. Bulk frames are skipped.
    pub fn opcodes(&self) -> Vec<u8> {
        self.reports()
            .iter()
            .filter(|r| r.starts_with(&[0xC0, 0x40]))
            .map(|r| r[4])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory transport. Each written report is logged and handed to a
/// responder; whatever it returns is queued as the next input report.
///
/// With nothing queued, `recv_report` never completes, so a missing reply
/// surfaces as the session's reply timeout.
pub struct ScriptedTransport {
    log: WriteLog,
    inbox: VecDeque<Vec<u8>>,
    responder: Responder,
    closed: bool,
}

impl ScriptedTransport {
    pub fn new(responder: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static) -> Self {
        Self {
            log: WriteLog::default(),
            inbox: VecDeque::new(),
            responder: Box::new(responder),
            closed: false,
        }
    }

    /// Transport backed by a [`DeviceSim`].
    pub fn simulated(mut sim: DeviceSim) -> Self {
        Self::new(move |report| sim.respond(report))
    }

    /// Handle to the write log; stays valid after the transport is moved.
    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("written", &self.log.len())
            .field("queued", &self.inbox.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transport for ScriptedTransport {
    async fn send_report(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()> {
        if self.closed {
            return Err(LabelPrinterError::TransportClosed);
        }
        self.log.push(report.to_vec());
        if let Some(reply) = (self.responder)(report) {
            self.inbox.push_back(reply);
        }
        Ok(())
    }

    async fn recv_report(&mut self) -> Result<Vec<u8>> {
        if let Some(reply) = self.inbox.pop_front() {
            return Ok(reply);
        }
        if self.closed {
            return Err(LabelPrinterError::TransportClosed);
        }
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.inbox.clear();
        Ok(())
    }
}

/// Inquiries answered while idle before the simulated device stops printing.
const IDLE_POLLS: u8 = 2;

/// Well-behaved device model for dry runs.
///
/// Starts printing on the start command, stops on the stop command, counts
/// a page per commit and finishes it on the next inquiry. Once every
/// committed page is out, printing clears after a couple of idle polls.
#[derive(Debug, Clone)]
pub struct DeviceSim {
    profile: &'static Profile,
    printing: bool,
    committed: u16,
    page_count: u16,
    idle_polls: u8,
    bulk_left: usize,
    ack_bulk: bool,
    replies: usize,
    busy_replies: usize,
    send_data: u16,
    faults: Vec<(FaultCode, usize)>,
}

impl DeviceSim {
    pub fn new(profile: &'static Profile) -> Self {
        Self {
            profile,
            printing: false,
            committed: 0,
            page_count: 0,
            idle_polls: 0,
            bulk_left: 0,
            ack_bulk: false,
            replies: 0,
            busy_replies: 0,
            send_data: 0,
            faults: Vec::new(),
        }
    }

    /// Raise `code` from the `nth` status reply on (1-based).
    pub fn with_fault(mut self, code: FaultCode, nth: usize) -> Self {
        self.faults.push((code, nth));
        self
    }

    /// Report the command-busy bit on the first `n` status replies.
    pub fn with_busy_replies(mut self, n: usize) -> Self {
        self.busy_replies = n;
        self
    }

    /// Value of the trailing numeric field (DPI readback).
    pub fn with_send_data(mut self, value: u16) -> Self {
        self.send_data = value;
        self
    }

    /// Pretend another job is already printing.
    pub fn printing(mut self) -> Self {
        self.printing = true;
        self
    }

    /// Answer one output report.
    pub fn respond(&mut self, report: &[u8]) -> Option<Vec<u8>> {
        if self.bulk_left > 0 {
            self.bulk_left -= 1;
            return (self.bulk_left == 0 && self.ack_bulk).then(|| self.status_report());
        }
        if report.len() < 8 || !report.starts_with(&[0xC0, 0x40]) {
            debug!(len = report.len(), "Simulated device ignoring stray frame");
            return None;
        }

        let param = usize::from(u16::from_be_bytes([report[2], report[3]]));
        let opcode = report[4];
        let profile = self.profile;
        let op = &profile.opcodes;
        if opcode == op.start_print {
            self.printing = true;
            self.idle_polls = 0;
        } else if opcode == op.stop_print {
            self.printing = false;
        } else if opcode == op.next_frame {
            self.bulk_left = chunk_count(param);
            self.ack_bulk = profile.flow.matrix_ack;
        } else if op.tag_set == Some(opcode) {
            self.bulk_left = chunk_count(param);
            self.ack_bulk = true;
        } else if opcode == op.buffer_full {
            self.committed += 1;
            self.idle_polls = 0;
        } else if opcode == op.inquiry && self.printing {
            self.advance();
        }
        Some(self.status_report())
    }

    fn advance(&mut self) {
        if self.page_count < self.committed {
            self.page_count += 1;
        } else if self.committed > 0 {
            self.idle_polls += 1;
            if self.idle_polls >= IDLE_POLLS {
                self.printing = false;
            }
        }
    }

    fn status_report(&mut self) -> Vec<u8> {
        self.replies += 1;
        let busy = self.replies <= self.busy_replies;
        let (mut main, mut func) = (0u16, 0u16);
        for bit in self.profile.layout {
            let set = match bit.signal {
                Signal::Printing => self.printing,
                Signal::CommandBusy => busy,
                Signal::BufferFull => false,
                Signal::Fault(code) => self.raised(code),
                Signal::FaultWhenClear(code) => !self.raised(code),
            };
            if set {
                match bit.word {
                    Word::Main => main |= bit.mask,
                    Word::Func => func |= bit.mask,
                }
            }
        }

        let mut reply = vec![0u8; REPORT_SIZE];
        reply[1..3].copy_from_slice(&main.to_le_bytes());
        reply[3..5].copy_from_slice(&func.to_le_bytes());
        reply[5..7].copy_from_slice(&self.page_count.to_le_bytes());
        reply[7..9].copy_from_slice(&self.send_data.to_le_bytes());
        reply
    }

    fn raised(&self, code: FaultCode) -> bool {
        self.faults
            .iter()
            .any(|(c, nth)| *c == code && self.replies >= *nth)
    }
}
