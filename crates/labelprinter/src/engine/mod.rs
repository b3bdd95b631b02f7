//! Print job engine.
//!
//! The engine is sans-IO: it never touches a transport or a clock. Callers
//! feed it [`Event`]s (a reply arrived, a timer fired, the user pressed stop)
//! and carry out the [`Action`]s it returns. At most one command is in flight
//! at any time; the engine advances only on a reply to that command or on the
//! timer it scheduled.
//!
//! [`Session`](crate::Session) is the tokio driver for real transports.

mod query;
mod state;

pub use query::DEFAULT_DPI;
pub use state::Step;

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{build_command_frame, build_command_frame_two, chunk_count};
use crate::job::{Page, PrintJob};
use crate::outcome::{ErrorKind, JobEvent, Outcome, Report, WaitSite};
use crate::profile::{
    CheckParam, CommitFrame, MaterialReadback, NextGate, PrintActive, Profile, Severity, StartParam,
};
use crate::status::{DeviceStatus, Faults, status_block};
use crate::{LabelPrinterError, Result};
use state::{Countdown, Counters, JobState, Pending, Wake};

/// Readback queries that run as their own short session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Label DPI; some families pick the opcode by paper type.
    ReadDpi { paper_type: u8 },
    /// Consumable serial and details.
    ReadMaterial,
}

/// Input to [`Engine::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A report arrived from the device.
    Frame(Vec<u8>),
    /// A [`Action::SendBulk`] completed. `reply` is the status report that
    /// followed it, if one was expected and arrived.
    BulkSent {
        frames: usize,
        reply: Option<Vec<u8>>,
    },
    /// The scheduled delay elapsed.
    Timer,
    /// No reply arrived within the reply timeout.
    ReplyTimeout,
    TransportLost(String),
    Stop,
    PushBatch(Vec<Page>),
}

/// Work the caller must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a command frame and deliver its reply.
    Send(Vec<u8>),
    /// Send a payload as 64-byte bulk frames, then report [`Event::BulkSent`].
    SendBulk { payload: Vec<u8>, expect_reply: bool },
    /// Deliver [`Event::Timer`] after the delay.
    Schedule(Duration),
    Notify(JobEvent),
    /// Release the transport.
    Close,
    /// The job is over. Emitted exactly once per job, after [`Action::Close`].
    Finish(Outcome),
}

/// One generalized print-job state machine, parameterized by a [`Profile`].
#[derive(Debug)]
pub struct Engine {
    profile: &'static Profile,
    step: Step,
    pending: Pending,
    job: Option<JobState>,
    query: Option<Query>,
    status: DeviceStatus,
    counters: Counters,
    outcome: Option<Outcome>,
    stop_requested: bool,
    stop_sent: bool,
    reported: Faults,
    glitches: u8,
    last_opcode: u8,
    last_command: Vec<u8>,
    out: Vec<Action>,
}

impl Engine {
    pub fn new(profile: &'static Profile) -> Self {
        Self {
            profile,
            step: Step::Idle,
            pending: Pending::None,
            job: None,
            query: None,
            status: DeviceStatus::default(),
            counters: Counters::new(profile),
            outcome: None,
            stop_requested: false,
            stop_sent: false,
            reported: Faults::empty(),
            glitches: 0,
            last_opcode: 0,
            last_command: Vec::new(),
            out: Vec::new(),
        }
    }

    pub fn profile(&self) -> &'static Profile {
        self.profile
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Latest decoded status snapshot.
    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.step, Step::Idle | Step::Closed)
    }

    /// Begin a print job. Rejected while another job or query is active.
    pub fn start(&mut self, job: PrintJob) -> Result<Vec<Action>> {
        if self.is_active() {
            return Err(LabelPrinterError::JobActive);
        }
        if job.has_tag() && self.profile.opcodes.tag_set.is_none() {
            return Err(LabelPrinterError::Unsupported {
                family: self.profile.name,
                operation: "tag programming",
            });
        }
        let limit = usize::from(u16::MAX);
        let tag_lens = job.tag.iter().flat_map(|tag| {
            std::iter::once(tag.primary.len()).chain(tag.secondary.as_ref().map(Vec::len))
        });
        let oversized = job
            .batches
            .iter()
            .flatten()
            .map(Page::len)
            .chain(tag_lens)
            .find(|len| *len > limit);
        if let Some(len) = oversized {
            return Err(LabelPrinterError::PayloadTooLarge(len));
        }

        self.reset();
        let state = JobState::new(job, self.profile);
        info!(
            family = self.profile.name,
            pages = state.current.len() + state.batches.iter().map(Vec::len).sum::<usize>(),
            target = state.target,
            tag = state.tag.is_some(),
            "Starting print job"
        );
        let has_tag = state.tag.is_some();
        let has_pages = state.has_pages();
        self.job = Some(state);

        if has_tag {
            self.announce_tag(Step::TagSet);
        } else if has_pages {
            self.begin_print();
        } else {
            self.finish(Outcome::Success);
        }
        Ok(self.take())
    }

    /// Begin a readback query. The session closes after one reply.
    pub fn start_query(&mut self, query: Query) -> Result<Vec<Action>> {
        if self.is_active() {
            return Err(LabelPrinterError::JobActive);
        }
        let opcodes = &self.profile.opcodes;
        let (opcode, operation) = match query {
            Query::ReadDpi { paper_type } => (
                opcodes.read_dpi.map(|rb| query::dpi_opcode(rb, paper_type)),
                "DPI readback",
            ),
            Query::ReadMaterial => (
                opcodes.read_material.map(|layout| match layout {
                    MaterialReadback::Short(op) | MaterialReadback::Extended(op) => op,
                }),
                "material readback",
            ),
        };
        let opcode = opcode.ok_or(LabelPrinterError::Unsupported {
            family: self.profile.name,
            operation,
        })?;

        self.reset();
        self.query = Some(query);
        debug!(family = self.profile.name, ?query, "Starting query");
        self.enter(Step::Query);
        self.send_command(opcode, 0);
        Ok(self.take())
    }

    /// Single entry point: advance on one event.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        if !self.is_active() {
            debug!(?event, "Ignoring event, no active job");
            return Vec::new();
        }
        match event {
            Event::Stop => self.request_stop(),
            Event::PushBatch(pages) => self.push_batch(pages),
            Event::Frame(reply) => self.on_frame(&reply),
            Event::BulkSent { frames, reply } => self.on_bulk_sent(frames, reply),
            Event::Timer => self.on_timer(),
            Event::ReplyTimeout => self.on_reply_lost(false),
            Event::TransportLost(reason) => self.on_transport_lost(reason),
        }
        self.take()
    }

    fn reset(&mut self) {
        self.step = Step::Init;
        self.pending = Pending::None;
        self.job = None;
        self.query = None;
        self.status = DeviceStatus::default();
        self.counters = Counters::new(self.profile);
        self.outcome = None;
        self.stop_requested = false;
        self.stop_sent = false;
        self.reported = Faults::empty();
        self.glitches = 0;
        self.out.clear();
    }

    fn take(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.out)
    }

    fn enter(&mut self, step: Step) {
        if self.step != step {
            debug!(family = self.profile.name, from = ?self.step, to = ?step, "Step transition");
            self.step = step;
        }
    }

    fn notify(&mut self, event: JobEvent) {
        self.out.push(Action::Notify(event));
    }

    fn schedule(&mut self, delay: Duration, wake: Wake) {
        self.pending = Pending::Timer(wake);
        self.out.push(Action::Schedule(delay));
    }

    fn send_command(&mut self, opcode: u8, param: u16) {
        self.send_frame(opcode, build_command_frame(opcode, param).to_vec());
    }

    /// Every command passes this gate; an observed stop request diverts
    /// the job into the stop sequence instead of sending.
    fn send_frame(&mut self, opcode: u8, frame: Vec<u8>) {
        if self.stop_requested && !self.step.is_stop_sequence() {
            self.enter_stop();
            return;
        }
        debug!(opcode, step = ?self.step, "Sending command");
        self.pending = Pending::Command(opcode);
        self.last_opcode = opcode;
        self.last_command = frame.clone();
        self.out.push(Action::Send(frame));
    }

    fn inquire(&mut self) {
        self.send_command(self.profile.opcodes.inquiry, 0);
    }

    fn material_code(&self) -> u16 {
        let paper_type = self.job.as_ref().map_or(0, |job| job.params.paper_type);
        (self.profile.material_code)(paper_type)
    }

    // ---- event handlers ----

    fn request_stop(&mut self) {
        if self.step == Step::Query || self.stop_requested {
            return;
        }
        info!(family = self.profile.name, step = ?self.step, "Stop requested");
        self.stop_requested = true;
    }

    fn push_batch(&mut self, pages: Vec<Page>) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let limit = usize::from(u16::MAX);
        let before = pages.len();
        let pages: Vec<Page> = pages.into_iter().filter(|page| page.len() <= limit).collect();
        if pages.len() != before {
            warn!(dropped = before - pages.len(), "Dropping oversized pages from pushed batch");
        }
        if !pages.is_empty() {
            debug!(pages = pages.len(), "Batch queued");
            job.batches.push_back(pages);
        }
    }

    fn on_frame(&mut self, reply: &[u8]) {
        let Pending::Command(opcode) = self.pending else {
            debug!(len = reply.len(), "Ignoring unsolicited reply");
            return;
        };
        let Some(block) = status_block(reply) else {
            warn!(opcode, len = reply.len(), "Malformed status reply");
            self.on_reply_lost(true);
            return;
        };
        self.pending = Pending::None;
        self.glitches = 0;
        self.status = DeviceStatus::decode(&block, self.profile.layout);

        if self.step == Step::Query {
            self.on_query_reply(reply);
            return;
        }
        if self.check_faults() {
            return;
        }
        self.on_reply(opcode);
    }

    fn on_bulk_sent(&mut self, frames: usize, reply: Option<Vec<u8>>) {
        if self.pending != Pending::Bulk {
            debug!(frames, "Ignoring unexpected bulk completion");
            return;
        }
        self.pending = Pending::None;
        match self.step {
            Step::SendMatrix => {
                if let Some(job) = self.job.as_mut() {
                    job.frames_sent = frames;
                }
                if !self.profile.flow.matrix_ack {
                    self.enter(Step::BufferCommit);
                    self.schedule(self.profile.flow.matrix_settle, Wake::Commit);
                    return;
                }
                if self.accept_bulk_reply(reply.as_deref()) {
                    self.try_commit();
                }
            }
            Step::TagWrite | Step::TagDivWrite => {
                if self.accept_bulk_reply(reply.as_deref()) {
                    self.after_tag_write();
                }
            }
            other => debug!(step = ?other, "Bulk completion ignored in this step"),
        }
    }

    fn accept_bulk_reply(&mut self, reply: Option<&[u8]>) -> bool {
        let Some(block) = reply.and_then(status_block) else {
            warn!(step = ?self.step, "No status after bulk transfer");
            self.fail(ErrorKind::DataTransferFailed);
            return false;
        };
        self.glitches = 0;
        self.status = DeviceStatus::decode(&block, self.profile.layout);
        !self.check_faults()
    }

    fn on_timer(&mut self) {
        let Pending::Timer(wake) = self.pending else {
            debug!("Ignoring stray timer");
            return;
        };
        self.pending = Pending::None;
        match wake {
            Wake::Resend => {
                let frame = self.last_command.clone();
                self.send_frame(self.last_opcode, frame);
            }
            Wake::Inquire => self.inquire(),
            Wake::Header => self.transfer_header(),
            Wake::Matrix => self.send_matrix(),
            Wake::Commit => self.try_commit(),
            Wake::TransferNext => self.transfer_next(),
        }
    }

    /// A reply never came or was garbled. Re-send a few times, then fail
    /// with the error of the command that was waiting.
    fn on_reply_lost(&mut self, malformed: bool) {
        let opcode = match self.pending {
            Pending::Command(opcode) => opcode,
            Pending::Bulk => {
                warn!(step = ?self.step, "Bulk transfer reply lost");
                self.pending = Pending::None;
                self.fail(ErrorKind::DataTransferFailed);
                return;
            }
            Pending::None | Pending::Timer(_) => {
                debug!("Reply timeout with nothing in flight");
                return;
            }
        };
        self.pending = Pending::None;

        match self.step {
            Step::WaitDeviceRelease => {
                warn!("Lost contact while waiting for release, closing");
                self.close();
                return;
            }
            Step::CheckStop => {
                if self.counters.stop_check.tick() {
                    self.schedule(self.profile.timing.stop_check.delay, Wake::Resend);
                } else {
                    self.fail(ErrorKind::CommandTimeout(WaitSite::StopCheck));
                }
                return;
            }
            _ => {}
        }

        self.glitches += 1;
        if self.glitches <= self.profile.timing.reply_retries {
            debug!(opcode, attempt = self.glitches, malformed, "Reply lost, re-sending");
            self.schedule(self.poll_delay(), Wake::Resend);
            return;
        }

        let kind = self.site_error(opcode, malformed);
        warn!(opcode, step = ?self.step, error = %kind, "Giving up on command");
        self.fail(kind);
    }

    fn on_transport_lost(&mut self, reason: String) {
        warn!(family = self.profile.name, %reason, "Transport lost");
        self.pending = Pending::None;
        if self.outcome.is_none() {
            self.outcome = Some(Outcome::Failure(ErrorKind::TransportUnavailable(reason)));
        }
        self.close();
    }

    /// Error reported when the reply to `opcode` never arrives.
    fn site_error(&self, opcode: u8, malformed: bool) -> ErrorKind {
        let op = &self.profile.opcodes;
        if opcode == op.inquiry || self.step == Step::Query {
            if malformed {
                ErrorKind::MalformedReply
            } else {
                ErrorKind::CommandTimeout(WaitSite::Reply)
            }
        } else if opcode == op.check_device {
            ErrorKind::CheckDeviceFailed
        } else if opcode == op.start_print || op.set_material == Some(opcode) {
            ErrorKind::StartPrintFailed
        } else if opcode == op.stop_print {
            ErrorKind::StopTimeout
        } else {
            ErrorKind::DataTransferFailed
        }
    }

    /// Delay before re-sending in the current step.
    fn poll_delay(&self) -> Duration {
        let t = &self.profile.timing;
        match self.step {
            Step::StartPrint | Step::WaitPrintActive => t.print_start.delay,
            Step::TransferHeader => self
                .profile
                .flow
                .header_poll
                .map_or(t.page_gap, |poll| poll.delay),
            Step::SendMatrix | Step::BufferCommit => t.commit_retry.delay,
            Step::TransferNext => t.next_page.delay,
            Step::WaitNextPageReady | Step::PrintEnd => t.page_wait.delay,
            Step::StopRequested | Step::StopManual => t.stop_wait.delay,
            _ => t.command_ready.delay,
        }
    }

    /// Runs on every decoded reply. Reports new advisories and fails the job
    /// on the first fatal fault in table order. Returns `true` if it failed.
    fn check_faults(&mut self) -> bool {
        let mut fatal = None;
        for rule in self.profile.faults {
            if !self.status.has(rule.code) {
                continue;
            }
            match rule.severity {
                Severity::Fatal => {
                    fatal = Some(rule.code);
                    break;
                }
                Severity::Advisory => {
                    if !self.reported.contains(rule.code.flag()) {
                        self.reported |= rule.code.flag();
                        warn!(family = self.profile.name, fault = ?rule.code, "{}", rule.code);
                        self.notify(JobEvent::Advisory { fault: rule.code });
                    }
                }
            }
        }

        let Some(code) = fatal else {
            return false;
        };
        if self.step == Step::WaitDeviceRelease {
            return false;
        }
        warn!(family = self.profile.name, step = ?self.step, fault = ?code, "Fatal device fault");
        self.fail(ErrorKind::DeviceFault(code));
        true
    }

    fn on_reply(&mut self, opcode: u8) {
        match self.step {
            Step::Init => self.on_initial_status(),
            Step::CheckDevice => {
                self.enter(Step::WaitCommandReady);
                self.inquire();
            }
            Step::WaitCommandReady => self.on_command_ready(),
            Step::StartPrint => self.on_start_ack(opcode),
            Step::WaitPrintActive => self.on_print_active(),
            Step::TransferHeader => self.on_header_reply(opcode),
            Step::BufferCommit => self.on_commit_ack(),
            Step::TransferNext => self.transfer_next(),
            Step::WaitNextPageReady => self.on_page_wait(),
            Step::PrintEnd => self.finish(Outcome::Success),
            Step::WaitDeviceRelease => self.on_release_poll(),
            Step::CheckStop => self.on_check_stop(),
            Step::StopManual => self.stop_manual(),
            Step::TagSet => self.write_tag(Step::TagWrite),
            Step::TagDivSet => self.write_tag(Step::TagDivWrite),
            other => debug!(step = ?other, opcode, "Reply ignored in this step"),
        }
    }

    // ---- print flow ----

    fn begin_print(&mut self) {
        if self.profile.flow.inquire_first {
            self.enter(Step::Init);
            self.inquire();
        } else {
            self.check_device();
        }
    }

    fn on_initial_status(&mut self) {
        if self.status.printing {
            warn!(family = self.profile.name, "Device already printing");
            self.fail(ErrorKind::DeviceBusy);
            return;
        }
        self.check_device();
    }

    fn check_device(&mut self) {
        self.enter(Step::CheckDevice);
        let param = match self.profile.flow.check_param {
            CheckParam::Zero => 0,
            CheckParam::MaterialAndCut => {
                let cut = self.job.as_ref().map_or(0, |job| job.params.cut_type);
                (self.material_code() << 8) | u16::from(cut)
            }
        };
        self.send_command(self.profile.opcodes.check_device, param);
    }

    fn on_command_ready(&mut self) {
        if !self.status.command_busy {
            self.enter(Step::FaultCheck);
            if self.profile.flow.reject_printing_at_start && self.status.printing {
                warn!(family = self.profile.name, "Device already printing");
                self.fail(ErrorKind::DeviceBusy);
                return;
            }
            self.start_print();
            return;
        }
        if !self.counters.ready.tick() {
            self.fail(ErrorKind::CommandTimeout(WaitSite::CommandReady));
            return;
        }
        debug!(remaining = self.counters.ready.remaining(), "Device busy, polling");
        self.schedule(self.profile.timing.command_ready.delay, Wake::Inquire);
    }

    fn start_print(&mut self) {
        self.enter(Step::StartPrint);
        match self.profile.opcodes.set_material {
            Some(opcode) => self.send_command(opcode, self.material_code()),
            None => self.send_start(),
        }
    }

    fn send_start(&mut self) {
        let param = match self.profile.flow.start_param {
            StartParam::Fixed(value) => value,
            StartParam::MaterialCode => self.material_code(),
            StartParam::Density => {
                let density = self.job.as_ref().map_or(0, |job| job.params.density);
                u16::from(density) << 8
            }
        };
        self.send_command(self.profile.opcodes.start_print, param);
    }

    fn on_start_ack(&mut self, opcode: u8) {
        if self.profile.opcodes.set_material == Some(opcode) {
            self.send_start();
            return;
        }
        match self.profile.flow.print_active {
            PrintActive::Immediate => self.transfer_header(),
            PrintActive::Printing | PrintActive::CommandIdle => {
                self.enter(Step::WaitPrintActive);
                self.inquire();
            }
        }
    }

    fn on_print_active(&mut self) {
        let active = match self.profile.flow.print_active {
            PrintActive::Printing => self.status.printing,
            PrintActive::CommandIdle => !self.status.command_busy,
            PrintActive::Immediate => true,
        };
        if active {
            self.transfer_header();
            return;
        }
        if !self.counters.start.tick() {
            self.fail(ErrorKind::CommandTimeout(WaitSite::PrintStart));
            return;
        }
        self.schedule(self.profile.timing.print_start.delay, Wake::Inquire);
    }

    fn transfer_header(&mut self) {
        let profile = self.profile;
        let has_page = self
            .job
            .as_mut()
            .is_some_and(|job| !job.current.is_empty() || job.next_batch(profile));
        if !has_page {
            self.wait_next_page();
            return;
        }

        self.enter(Step::TransferHeader);
        match profile.flow.header_poll {
            Some(poll) => {
                self.counters.header = Countdown::new(poll.budget);
                self.inquire();
            }
            None => self.send_page_header(),
        }
    }

    fn on_header_reply(&mut self, opcode: u8) {
        if opcode == self.profile.opcodes.next_frame {
            self.send_matrix();
            return;
        }
        if !self.status.buffer_full {
            self.send_page_header();
            return;
        }
        if !self.counters.header.tick() {
            self.fail(ErrorKind::CommandTimeout(WaitSite::HeaderPoll));
            return;
        }
        let delay = self
            .profile
            .flow
            .header_poll
            .map_or(Duration::ZERO, |poll| poll.delay);
        self.schedule(delay, Wake::Inquire);
    }

    fn send_page_header(&mut self) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let Some(page) = job.current.pop_front() else {
            return;
        };
        let drained = job.current.is_empty();
        let len = page.len();
        let number = job.pages_sent + 1;
        job.frames_sent = 0;
        job.frames_total = chunk_count(len);
        job.page = Some(page);

        self.counters.matrix = Countdown::new(self.profile.timing.matrix_retry.budget);
        self.counters.commit = Countdown::new(self.profile.timing.commit_retry.budget);
        if drained {
            self.notify(JobEvent::BatchDrained);
        }
        debug!(page = number, bytes = len, "Sending page header");
        self.send_command(self.profile.opcodes.next_frame, wire_len(len));
    }

    fn send_matrix(&mut self) {
        self.enter(Step::SendMatrix);
        if self.status.command_busy {
            if !self.counters.matrix.tick() {
                warn!("Device stayed busy before pixel data");
                self.fail(ErrorKind::DataTransferFailed);
                return;
            }
            self.schedule(self.profile.timing.matrix_retry.delay, Wake::Matrix);
            return;
        }
        let payload = self
            .job
            .as_ref()
            .and_then(|job| job.page.as_ref())
            .map(|page| page.as_bytes().to_vec())
            .unwrap_or_default();
        if payload.is_empty() {
            self.try_commit();
            return;
        }
        debug!(bytes = payload.len(), frames = chunk_count(payload.len()), "Sending pixel data");
        self.pending = Pending::Bulk;
        self.out.push(Action::SendBulk {
            payload,
            expect_reply: self.profile.flow.matrix_ack,
        });
    }

    /// Sends the buffer-full commit once every frame of the page went out.
    fn try_commit(&mut self) {
        self.enter(Step::BufferCommit);
        let Some(job) = self.job.as_ref() else {
            return;
        };
        let flow = &self.profile.flow;
        let ready = job.frames_sent == job.frames_total
            && (!flow.commit_requires_data || job.frames_total > 0);

        if ready {
            let opcode = self.profile.opcodes.buffer_full;
            let len = wire_len(job.page_len());
            let frame = match flow.commit {
                CommitFrame::Plain => build_command_frame(opcode, 0).to_vec(),
                CommitFrame::PageLength => build_command_frame(opcode, len).to_vec(),
                CommitFrame::WithSpeed => build_command_frame_two(opcode, len, job.speed).to_vec(),
            };
            self.send_frame(opcode, frame);
            return;
        }

        let (sent, total, page) = (job.frames_sent, job.frames_total, job.pages_sent + 1);
        if self.counters.commit.tick() {
            debug!(sent, total, "Commit not ready, retrying");
            self.schedule(self.profile.timing.commit_retry.delay, Wake::Commit);
            return;
        }
        warn!(page, sent, total, "Buffer commit failed, continuing");
        self.notify(JobEvent::CommitFailed { page });
        self.wait_next_page();
    }

    fn on_commit_ack(&mut self) {
        let profile = self.profile;
        let Some(job) = self.job.as_mut() else {
            return;
        };
        job.pages_sent += 1;
        job.page = None;
        let page = job.pages_sent;
        let more_in_batch = !job.current.is_empty();
        let next_batch = !more_in_batch && job.next_batch(profile);

        debug!(page, "Page committed");
        self.notify(JobEvent::PageSent { page });
        if more_in_batch {
            self.schedule(profile.timing.page_gap, Wake::Header);
        } else if next_batch {
            self.begin_transfer_next();
        } else {
            self.wait_next_page();
        }
    }

    fn begin_transfer_next(&mut self) {
        self.enter(Step::TransferNext);
        self.counters.next = Countdown::new(self.profile.timing.next_page.budget);
        self.schedule(self.profile.timing.page_gap, Wake::TransferNext);
    }

    /// Gate between batches: wait for the device to make room.
    fn transfer_next(&mut self) {
        self.enter(Step::TransferNext);
        let blocked = match self.profile.flow.next_gate {
            NextGate::BufferFree => {
                self.account_pages();
                self.status.buffer_full
            }
            // counted only once the device moved past our printed counter
            NextGate::PageCounter => {
                let blocked = self.job.as_ref().is_some_and(|job| {
                    i32::from(job.printed) - i32::from(job.params.keep_on_print)
                        == i32::from(self.status.page_count)
                });
                if !blocked {
                    self.account_pages();
                }
                blocked
            }
        };
        if !blocked {
            self.transfer_header();
            return;
        }
        if self.profile.flow.abort_when_stalled && !self.status.printing {
            warn!(family = self.profile.name, "Device stopped printing mid-job");
            self.fail(ErrorKind::Interrupted);
            return;
        }
        if !self.counters.next.tick() {
            self.fail(ErrorKind::CommandTimeout(WaitSite::NextPage));
            return;
        }
        self.schedule(self.profile.timing.next_page.delay, Wake::Inquire);
    }

    /// Count a printed page when the device counter moved past ours.
    fn account_pages(&mut self) {
        let page_count = i32::from(self.status.page_count);
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let keep = i32::from(job.params.keep_on_print);
        if page_count > i32::from(job.printed) - keep && job.target > job.printed {
            job.printed += 1;
            let count = job.printed;
            self.notify(JobEvent::Printed { count });
        }
    }

    fn wait_next_page(&mut self) {
        self.enter(Step::WaitNextPageReady);
        self.counters.page_wait = Countdown::new(self.profile.timing.page_wait.budget);
        self.schedule(self.profile.timing.page_gap, Wake::Inquire);
    }

    fn on_page_wait(&mut self) {
        self.account_pages();
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let printing = self.status.printing;

        if self.profile.flow.end_on_page_count {
            let done = self.status.page_count >= job.target.saturating_sub(1) || job.target == 1;
            if done || !printing {
                if job.target > job.printed {
                    job.printed += 1;
                    let count = job.printed;
                    self.notify(JobEvent::Printed { count });
                }
                self.print_end();
                return;
            }
        } else if !printing {
            self.print_end();
            return;
        }

        if job.has_pages() {
            self.begin_transfer_next();
            return;
        }
        if !self.counters.page_wait.tick() {
            info!(family = self.profile.name, "No more pages arrived");
            self.print_end();
            return;
        }
        self.schedule(self.profile.timing.page_wait.delay, Wake::Inquire);
    }

    fn print_end(&mut self) {
        self.enter(Step::PrintEnd);
        self.inquire();
    }

    // ---- termination ----

    fn fail(&mut self, kind: ErrorKind) {
        self.finish(Outcome::Failure(kind));
    }

    /// Record the outcome (first one wins) and head for close.
    fn finish(&mut self, outcome: Outcome) {
        match &outcome {
            Outcome::Success => info!(family = self.profile.name, "Print job finished"),
            Outcome::Failure(kind) => {
                warn!(family = self.profile.name, step = ?self.step, error = %kind, "Print job failed")
            }
        }
        // a busy device is running someone else's job; nothing to wait for
        let ours = !matches!(outcome, Outcome::Failure(ErrorKind::DeviceBusy));
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }

        if ours && self.profile.flow.wait_release && self.status.printing {
            let poll = if self.stop_requested {
                self.profile.timing.stop_release
            } else {
                self.profile.timing.release
            };
            self.enter(Step::WaitDeviceRelease);
            self.counters.release = Countdown::new(poll.budget);
            self.schedule(poll.delay, Wake::Inquire);
        } else {
            self.close();
        }
    }

    fn on_release_poll(&mut self) {
        if !self.status.printing {
            self.close();
            return;
        }
        if !self.counters.release.tick() {
            warn!(family = self.profile.name, "Device still printing, forcing close");
            self.close();
            return;
        }
        let poll = if self.stop_requested {
            self.profile.timing.stop_release
        } else {
            self.profile.timing.release
        };
        self.schedule(poll.delay, Wake::Inquire);
    }

    fn close(&mut self) {
        self.enter(Step::Closed);
        self.pending = Pending::None;
        self.job = None;
        self.query = None;
        let outcome = self.outcome.take().unwrap_or(Outcome::Success);
        self.out.push(Action::Close);
        self.out.push(Action::Finish(outcome));
    }

    // ---- stop sequence ----

    fn enter_stop(&mut self) {
        info!(family = self.profile.name, step = ?self.step, "Entering stop sequence");
        self.enter(Step::StopRequested);
        self.counters.stop_check = Countdown::new(self.profile.timing.stop_check.budget);
        self.counters.stop_wait = Countdown::new(self.profile.timing.stop_wait.budget);
        if self.profile.flow.stop_precheck {
            self.enter(Step::CheckStop);
            self.inquire();
        } else {
            self.enter(Step::StopManual);
            self.stop_manual();
        }
    }

    fn on_check_stop(&mut self) {
        if self.status.printing {
            self.enter(Step::StopManual);
            self.stop_manual();
        } else {
            self.fail(ErrorKind::Aborted);
        }
    }

    /// Stop the device if it is printing; defer while it is busy.
    fn stop_manual(&mut self) {
        if !self.status.printing {
            self.fail(ErrorKind::Aborted);
            return;
        }
        if self.status.command_busy {
            if !self.counters.stop_wait.tick() {
                self.fail(ErrorKind::StopTimeout);
                return;
            }
            debug!("Device busy, deferring stop");
            self.schedule(self.profile.timing.stop_wait.delay, Wake::Inquire);
            return;
        }
        if !self.stop_sent {
            self.stop_sent = true;
            self.send_command(self.profile.opcodes.stop_print, 0);
            return;
        }
        if !self.counters.stop_wait.tick() {
            self.fail(ErrorKind::StopTimeout);
            return;
        }
        self.schedule(self.profile.timing.stop_wait.delay, Wake::Inquire);
    }

    // ---- tag branch ----

    fn tag_segment(&self, step: Step) -> Option<&[u8]> {
        let tag = self.job.as_ref()?.tag.as_ref()?;
        match step {
            Step::TagSet | Step::TagWrite => Some(tag.primary.as_slice()),
            Step::TagDivSet | Step::TagDivWrite => tag.secondary.as_deref(),
            _ => None,
        }
    }

    fn announce_tag(&mut self, step: Step) {
        let Some(opcode) = self.profile.opcodes.tag_set else {
            return;
        };
        let len = self.tag_segment(step).map_or(0, <[u8]>::len);
        self.enter(step);
        debug!(bytes = len, "Announcing tag payload");
        self.send_command(opcode, wire_len(len));
    }

    fn write_tag(&mut self, step: Step) {
        let payload = self.tag_segment(step).map(<[u8]>::to_vec).unwrap_or_default();
        self.enter(step);
        self.pending = Pending::Bulk;
        self.out.push(Action::SendBulk {
            payload,
            expect_reply: true,
        });
    }

    fn after_tag_write(&mut self) {
        if self.step == Step::TagWrite {
            let has_secondary = self
                .tag_segment(Step::TagDivSet)
                .is_some_and(|segment| !segment.is_empty());
            if has_secondary {
                self.announce_tag(Step::TagDivSet);
                return;
            }
            if self.job.as_ref().is_some_and(JobState::has_pages) {
                self.begin_print();
                return;
            }
        }
        info!(family = self.profile.name, "Tag programmed");
        self.finish(Outcome::Success);
    }

    // ---- queries ----

    fn on_query_reply(&mut self, reply: &[u8]) {
        let opcodes = self.profile.opcodes;
        match self.query {
            Some(Query::ReadDpi { paper_type }) => {
                if let Some(readback) = opcodes.read_dpi {
                    let dpi = query::parse_dpi(readback, &self.status, paper_type);
                    info!(family = self.profile.name, dpi, "DPI read back");
                    self.notify(JobEvent::Report {
                        report: Report::Dpi(dpi),
                    });
                }
            }
            Some(Query::ReadMaterial) => {
                match opcodes
                    .read_material
                    .and_then(|layout| query::parse_material(layout, reply))
                {
                    Some(info) => {
                        info!(family = self.profile.name, serial = info.serial, "Material read back");
                        self.notify(JobEvent::Report {
                            report: Report::Material(info),
                        });
                    }
                    None => debug!("No consumable information in reply"),
                }
            }
            None => {}
        }
        self.outcome = Some(Outcome::Success);
        self.close();
    }
}

/// Lengths travel as 16-bit command parameters.
fn wire_len(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobParams, TagPayload};
    use crate::profile::Family;
    use crate::status::FaultCode;

    /// Build a reply report with the given status words.
    fn reply(main: u16, func: u16) -> Vec<u8> {
        let mut r = vec![0u8; 64];
        r[1..3].copy_from_slice(&main.to_le_bytes());
        r[3..5].copy_from_slice(&func.to_le_bytes());
        r
    }

    fn sent_opcodes(actions: &[Action]) -> Vec<u8> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(frame) => Some(frame[4]),
                _ => None,
            })
            .collect()
    }

    fn finished(actions: &[Action]) -> Option<&Outcome> {
        actions.iter().find_map(|a| match a {
            Action::Finish(outcome) => Some(outcome),
            _ => None,
        })
    }

    fn one_page_job() -> PrintJob {
        PrintJob::new(JobParams::default()).with_batch(vec![Page::new(vec![0xFF; 100])])
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut engine = Engine::new(Family::T5080.profile());
        engine.start(one_page_job()).unwrap();
        assert!(matches!(
            engine.start(one_page_job()),
            Err(LabelPrinterError::JobActive)
        ));
    }

    #[test]
    fn test_tag_rejected_on_family_without_tag_opcode() {
        let mut engine = Engine::new(Family::G.profile());
        let job = one_page_job().with_tag(TagPayload::new(vec![1, 2, 3]));
        assert!(matches!(
            engine.start(job),
            Err(LabelPrinterError::Unsupported { .. })
        ));
        assert!(!engine.is_active());
    }

    #[test]
    fn test_g_inquires_first_and_rejects_busy_device() {
        let mut engine = Engine::new(Family::G.profile());
        let actions = engine.start(one_page_job()).unwrap();
        assert_eq!(sent_opcodes(&actions), vec![17]);

        // printing bit set: device busy with another job
        let actions = engine.handle(Event::Frame(reply(0, 0x0040)));
        assert_eq!(
            finished(&actions),
            Some(&Outcome::Failure(ErrorKind::DeviceBusy))
        );
    }

    #[test]
    fn test_command_ready_times_out_after_budget_plus_one_polls() {
        let mut engine = Engine::new(Family::T5080.profile());
        let mut actions = engine.start(one_page_job()).unwrap();
        assert_eq!(sent_opcodes(&actions), vec![18]);
        actions = engine.handle(Event::Frame(reply(0, 0)));
        assert_eq!(engine.step(), Step::WaitCommandReady);

        let mut inquiries = sent_opcodes(&actions).len();
        loop {
            actions = engine.handle(Event::Frame(reply(0x0400, 0)));
            if let Some(outcome) = finished(&actions) {
                assert_eq!(
                    outcome,
                    &Outcome::Failure(ErrorKind::CommandTimeout(WaitSite::CommandReady))
                );
                break;
            }
            assert_eq!(actions, vec![Action::Schedule(Duration::from_millis(500))]);
            actions = engine.handle(Event::Timer);
            inquiries += sent_opcodes(&actions).len();
        }
        assert_eq!(inquiries, 21);
    }

    #[test]
    fn test_lost_check_reply_retries_then_fails() {
        let mut engine = Engine::new(Family::T5080.profile());
        engine.start(one_page_job()).unwrap();
        for _ in 0..3 {
            let actions = engine.handle(Event::ReplyTimeout);
            assert!(matches!(actions[..], [Action::Schedule(_)]));
            let actions = engine.handle(Event::Timer);
            assert_eq!(sent_opcodes(&actions), vec![18]);
        }
        let actions = engine.handle(Event::Frame(vec![0u8; 4]));
        assert_eq!(
            finished(&actions),
            Some(&Outcome::Failure(ErrorKind::CheckDeviceFailed))
        );
    }

    #[test]
    fn test_stop_during_timer_sends_nothing_on_sp() {
        let mut engine = Engine::new(Family::Sp.profile());
        engine.start(one_page_job()).unwrap();
        // check device ok (ribbon ok bit set), then busy so a timer is pending
        engine.handle(Event::Frame(reply(0x0010, 0)));
        let actions = engine.handle(Event::Frame(reply(0x0410, 0)));
        assert!(matches!(actions[..], [Action::Schedule(_)]));

        assert!(engine.handle(Event::Stop).is_empty());
        let actions = engine.handle(Event::Timer);
        assert!(sent_opcodes(&actions).is_empty());
        assert_eq!(
            finished(&actions),
            Some(&Outcome::Failure(ErrorKind::Aborted))
        );
        assert_eq!(actions.first(), Some(&Action::Close));
    }

    #[test]
    fn test_stop_on_printing_device_sends_stop_command() {
        let mut engine = Engine::new(Family::Tp.profile());
        engine.start(one_page_job()).unwrap();
        engine.handle(Event::Frame(reply(0, 0)));
        engine.handle(Event::Frame(reply(0, 0)));
        // start acknowledged, now waiting for print active
        engine.handle(Event::Frame(reply(0, 0)));
        assert_eq!(engine.step(), Step::WaitPrintActive);
        engine.handle(Event::Frame(reply(0, 0)));
        engine.handle(Event::Stop);
        // last status says printing, so the stop command goes out
        engine.status.printing = true;
        let actions = engine.handle(Event::Timer);
        assert_eq!(sent_opcodes(&actions), vec![20]);
        let actions = engine.handle(Event::Frame(reply(0, 0x0001)));
        assert!(matches!(actions[..], [Action::Schedule(_)]));
        engine.handle(Event::Timer);
        let actions = engine.handle(Event::Frame(reply(0, 0)));
        assert_eq!(
            finished(&actions),
            Some(&Outcome::Failure(ErrorKind::Aborted))
        );
    }

    #[test]
    fn test_busy_stop_repolls_until_device_is_free() {
        let mut engine = Engine::new(Family::Tp.profile());
        engine.start(one_page_job()).unwrap();
        engine.handle(Event::Frame(reply(0, 0))); // check
        engine.handle(Event::Frame(reply(0, 0))); // ready
        engine.handle(Event::Frame(reply(0, 0))); // start
        assert_eq!(engine.step(), Step::WaitPrintActive);
        assert!(engine.handle(Event::Stop).is_empty());

        // printing and busy: the stop waits for a fresh status
        let actions = engine.handle(Event::Frame(reply(0x0400, 0x0001)));
        assert_eq!(engine.step(), Step::StopManual);
        assert_eq!(actions, vec![Action::Schedule(Duration::from_millis(500))]);
        let actions = engine.handle(Event::Timer);
        assert_eq!(sent_opcodes(&actions), vec![17]);

        let actions = engine.handle(Event::Frame(reply(0, 0x0001)));
        assert_eq!(sent_opcodes(&actions), vec![20]);
        let actions = engine.handle(Event::Frame(reply(0, 0)));
        assert_eq!(
            finished(&actions),
            Some(&Outcome::Failure(ErrorKind::Aborted))
        );
    }

    #[test]
    fn test_advisory_reported_once() {
        let mut engine = Engine::new(Family::T5080.profile());
        engine.start(one_page_job()).unwrap();
        let low_battery = reply(0x0040, 0);
        let actions = engine.handle(Event::Frame(low_battery.clone()));
        assert!(actions.contains(&Action::Notify(JobEvent::Advisory {
            fault: FaultCode::LowBattery
        })));
        let actions = engine.handle(Event::Frame(low_battery));
        assert!(!actions.iter().any(|a| matches!(a, Action::Notify(JobEvent::Advisory { .. }))));
        assert_eq!(engine.step(), Step::StartPrint);
    }

    #[test]
    fn test_empty_page_cannot_commit_on_tp() {
        let mut engine = Engine::new(Family::TpB.profile());
        let job = PrintJob::new(JobParams::default()).with_batch(vec![Page::new(vec![])]);
        engine.start(job).unwrap();
        engine.handle(Event::Frame(reply(0, 0))); // check
        engine.handle(Event::Frame(reply(0, 0))); // ready
        engine.handle(Event::Frame(reply(0, 0))); // start
        let actions = engine.handle(Event::Frame(reply(0, 0))); // command idle
        assert_eq!(sent_opcodes(&actions), vec![92]);
        let mut actions = engine.handle(Event::Frame(reply(0, 0)));
        let mut ticks = 0;
        while !actions
            .iter()
            .any(|a| matches!(a, Action::Notify(JobEvent::CommitFailed { page: 1 })))
        {
            assert!(sent_opcodes(&actions).is_empty());
            actions = engine.handle(Event::Timer);
            ticks += 1;
        }
        assert_eq!(ticks, 50);
        assert_eq!(engine.step(), Step::WaitNextPageReady);
    }

    #[test]
    fn test_sp_dpi_query() {
        let mut engine = Engine::new(Family::Sp.profile());
        let actions = engine
            .start_query(Query::ReadDpi { paper_type: 3 })
            .unwrap();
        assert_eq!(sent_opcodes(&actions), vec![36]);
        let mut r = reply(0, 0);
        r[7..9].copy_from_slice(&576u16.to_le_bytes());
        let actions = engine.handle(Event::Frame(r));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Notify(JobEvent::Report { report: Report::Dpi(dpi) }) if (dpi - 11.666).abs() < 0.01
        )));
        assert_eq!(finished(&actions), Some(&Outcome::Success));
    }

    #[test]
    fn test_query_unsupported() {
        let mut engine = Engine::new(Family::G.profile());
        assert!(engine.start_query(Query::ReadDpi { paper_type: 1 }).is_err());
    }

    #[test]
    fn test_events_ignored_when_idle() {
        let mut engine = Engine::new(Family::G.profile());
        assert!(engine.handle(Event::Stop).is_empty());
        assert!(engine.handle(Event::Timer).is_empty());
        assert_eq!(engine.step(), Step::Idle);
    }

    #[test]
    fn test_transport_loss_is_fatal() {
        let mut engine = Engine::new(Family::G.profile());
        engine.start(one_page_job()).unwrap();
        let actions = engine.handle(Event::TransportLost("unplugged".into()));
        assert_eq!(actions[0], Action::Close);
        assert_eq!(
            finished(&actions),
            Some(&Outcome::Failure(ErrorKind::TransportUnavailable("unplugged".into())))
        );
        assert!(!engine.is_active());
    }
}
