//! Engine bookkeeping: step identifiers, pending work, retry counters.

use std::collections::VecDeque;

use crate::job::{JobParams, Page, PrintJob, TagPayload};
use crate::profile::{Profile, SpeedRule};

/// Where the engine is in a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Idle,
    Init,
    CheckDevice,
    WaitCommandReady,
    FaultCheck,
    StartPrint,
    WaitPrintActive,
    TransferHeader,
    SendMatrix,
    BufferCommit,
    TransferNext,
    WaitNextPageReady,
    PrintEnd,
    WaitDeviceRelease,
    Closed,
    StopRequested,
    CheckStop,
    StopManual,
    TagSet,
    TagWrite,
    TagDivSet,
    TagDivWrite,
    Query,
}

impl Step {
    /// Steps the stop gate never diverts.
    pub(crate) fn is_stop_sequence(self) -> bool {
        matches!(
            self,
            Step::StopRequested
                | Step::CheckStop
                | Step::StopManual
                | Step::WaitDeviceRelease
                | Step::Closed
                | Step::Query
        )
    }
}

/// What the engine is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    None,
    Command(u8),
    Bulk,
    Timer(Wake),
}

/// Continuation run when a scheduled timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// Re-send the last command after a lost or garbled reply.
    Resend,
    /// Send a status inquiry and stay in the current step.
    Inquire,
    Header,
    Matrix,
    Commit,
    TransferNext,
}

/// Bounded retry counter. A budget of `n` allows `n` re-polls after the
/// first one; the counter expires when it drops below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Countdown(i32);

impl Countdown {
    pub(crate) fn new(budget: i32) -> Self {
        Self(budget)
    }

    /// Consume one tick. Returns `false` once the budget is exhausted.
    pub(crate) fn tick(&mut self) -> bool {
        self.0 -= 1;
        self.0 >= 0
    }

    pub(crate) fn remaining(&self) -> i32 {
        self.0
    }
}

/// Retry counters, one per wait state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Counters {
    pub ready: Countdown,
    pub start: Countdown,
    pub header: Countdown,
    pub matrix: Countdown,
    pub commit: Countdown,
    pub next: Countdown,
    pub page_wait: Countdown,
    pub stop_check: Countdown,
    pub stop_wait: Countdown,
    pub release: Countdown,
}

impl Counters {
    pub(crate) fn new(profile: &Profile) -> Self {
        let t = &profile.timing;
        let header = profile.flow.header_poll.map_or(0, |poll| poll.budget);
        Self {
            ready: Countdown::new(t.command_ready.budget),
            start: Countdown::new(t.print_start.budget),
            header: Countdown::new(header),
            matrix: Countdown::new(t.matrix_retry.budget),
            commit: Countdown::new(t.commit_retry.budget),
            next: Countdown::new(t.next_page.budget),
            page_wait: Countdown::new(t.page_wait.budget),
            stop_check: Countdown::new(t.stop_check.budget),
            stop_wait: Countdown::new(t.stop_wait.budget),
            release: Countdown::new(t.release.budget),
        }
    }
}

/// The job as owned by the engine while it runs.
#[derive(Debug)]
pub(crate) struct JobState {
    pub batches: VecDeque<Vec<Page>>,
    pub current: VecDeque<Page>,
    pub page: Option<Page>,
    pub tag: Option<TagPayload>,
    pub params: JobParams,
    pub target: u16,
    pub printed: u16,
    pub pages_sent: usize,
    pub speed: u16,
    pub frames_sent: usize,
    pub frames_total: usize,
}

impl JobState {
    pub(crate) fn new(job: PrintJob, profile: &Profile) -> Self {
        let target = job.target_pages();
        let tag = job.tag.filter(|tag| !tag.is_empty());
        let mut state = Self {
            batches: job.batches,
            current: VecDeque::new(),
            page: None,
            tag,
            params: job.params,
            target,
            printed: 0,
            pages_sent: 0,
            speed: job.params.speed,
            frames_sent: 0,
            frames_total: 0,
        };
        state.next_batch(profile);
        state
    }

    /// Move the next queued batch into `current`. Returns `false` if none.
    pub(crate) fn next_batch(&mut self, profile: &Profile) -> bool {
        let Some(batch) = self.batches.pop_front() else {
            return false;
        };
        if let SpeedRule::ByBatchSize { multi, single } = profile.flow.speed {
            self.speed = if batch.len() > 1 { multi } else { single };
        }
        self.current = batch.into();
        true
    }

    pub(crate) fn has_pages(&self) -> bool {
        !self.current.is_empty() || self.batches.iter().any(|b| !b.is_empty())
    }

    pub(crate) fn page_len(&self) -> usize {
        self.page.as_ref().map_or(0, Page::len)
    }
}
