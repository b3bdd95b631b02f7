//! Tokio driver for the job engine.
//!
//! A [`Session`] owns one [`Transport`] and one [`Engine`]. It carries out
//! the engine's actions in order, turns replies, reply timeouts and timer
//! expiries into events, and feeds control messages (stop, more pages) in
//! while it waits.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::codec::{chunk_bulk_payload, pad_report};
use crate::engine::{Action, Engine, Event, Query};
use crate::job::{Page, PrintJob};
use crate::options::SessionOptions;
use crate::outcome::{JobEvent, Outcome, Report};
use crate::profile::Profile;
use crate::transport::Transport;
use crate::{LabelPrinterError, Result};

/// Control channel capacity.
const CONTROL_CAPACITY: usize = 16;

/// Messages accepted while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Cooperative stop; observed before the next command goes out.
    Stop,
    /// Append a batch of pages to the running job.
    PushBatch(Vec<Page>),
}

/// Runs jobs and queries against one device.
pub struct Session<T: Transport> {
    engine: Engine,
    transport: T,
    options: SessionOptions,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    report: Option<Report>,
    /// A job already ended, so anything still queued is stale.
    finished_once: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(profile: &'static Profile, transport: T, options: SessionOptions) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        Self {
            engine: Engine::new(profile),
            transport,
            options,
            control_tx,
            control_rx,
            report: None,
            finished_once: false,
        }
    }

    /// Sender for [`Control`] messages. Messages sent before the first job
    /// are picked up by it. Messages still queued when a job ends, or sent
    /// between jobs, are discarded when the next job starts.
    pub fn control_handle(&self) -> mpsc::Sender<Control> {
        self.control_tx.clone()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run a print job to completion.
    pub async fn run(&mut self, job: PrintJob) -> Result<Outcome> {
        let actions = self.engine.start(job)?;
        self.discard_stale_controls();
        self.drive(actions).await
    }

    /// Run a readback query. The report is `None` when the device had
    /// nothing to report or the query failed.
    pub async fn query(&mut self, query: Query) -> Result<(Outcome, Option<Report>)> {
        let actions = self.engine.start_query(query)?;
        self.discard_stale_controls();
        self.report = None;
        let outcome = self.drive(actions).await?;
        Ok((outcome, self.report.take()))
    }

    async fn drive(&mut self, actions: Vec<Action>) -> Result<Outcome> {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            let event = match action {
                Action::Send(frame) => self.exchange(&frame).await,
                Action::SendBulk {
                    payload,
                    expect_reply,
                } => self.send_bulk(&payload, expect_reply).await,
                Action::Schedule(delay) => self.pause(delay).await,
                Action::Notify(event) => {
                    self.emit(event);
                    continue;
                }
                Action::Close => {
                    if let Err(e) = self.transport.close().await {
                        warn!(error = %e, "Failed to close transport");
                    }
                    continue;
                }
                Action::Finish(outcome) => {
                    self.finished_once = true;
                    return Ok(outcome);
                }
            };
            queue.extend(self.engine.handle(event));
        }
        self.finished_once = true;
        Err(LabelPrinterError::Stalled)
    }

    fn discard_stale_controls(&mut self) {
        if !self.finished_once {
            return;
        }
        let mut dropped = 0;
        while self.control_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded control messages left from an earlier job");
        }
    }

    async fn exchange(&mut self, frame: &[u8]) -> Event {
        if let Err(e) = self.transport.send_report(&pad_report(frame)).await {
            return Event::TransportLost(e.to_string());
        }
        self.await_reply().await
    }

    async fn send_bulk(&mut self, payload: &[u8], expect_reply: bool) -> Event {
        let mut frames = 0;
        for chunk in chunk_bulk_payload(payload) {
            if let Err(e) = self.transport.send_report(&chunk).await {
                return Event::TransportLost(e.to_string());
            }
            frames += 1;
        }
        debug!(frames, bytes = payload.len(), "Bulk transfer sent");

        let reply = if expect_reply {
            match self.await_reply().await {
                Event::Frame(reply) => Some(reply),
                lost @ Event::TransportLost(_) => return lost,
                _ => None,
            }
        } else {
            None
        };
        Event::BulkSent { frames, reply }
    }

    /// Wait for one input report, the reply timeout, or transport loss.
    async fn await_reply(&mut self) -> Event {
        let deadline = Instant::now() + self.options.reply_timeout;
        let Self {
            engine,
            transport,
            control_rx,
            ..
        } = self;
        loop {
            tokio::select! {
                biased;
                Some(msg) = control_rx.recv() => apply_control(engine, msg),
                reply = transport.recv_report() => {
                    return match reply {
                        Ok(reply) => Event::Frame(reply),
                        Err(e) => Event::TransportLost(e.to_string()),
                    };
                }
                () = sleep_until(deadline) => return Event::ReplyTimeout,
            }
        }
    }

    async fn pause(&mut self, delay: Duration) -> Event {
        let deadline = Instant::now() + delay;
        let Self {
            engine, control_rx, ..
        } = self;
        loop {
            tokio::select! {
                biased;
                Some(msg) = control_rx.recv() => apply_control(engine, msg),
                () = sleep_until(deadline) => return Event::Timer,
            }
        }
    }

    fn emit(&mut self, event: JobEvent) {
        if let JobEvent::Report { report } = &event {
            self.report = Some(report.clone());
        }
        if let Some(tx) = &self.options.events {
            let _ = tx.send(event);
        }
    }
}

fn apply_control(engine: &mut Engine, msg: Control) {
    let event = match msg {
        Control::Stop => Event::Stop,
        Control::PushBatch(pages) => Event::PushBatch(pages),
    };
    let actions = engine.handle(event);
    if !actions.is_empty() {
        warn!(?actions, "Control message produced actions, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Step;
    use crate::job::JobParams;
    use crate::outcome::{ErrorKind, WaitSite};
    use crate::profile::Family;
    use crate::status::FaultCode;
    use crate::REPORT_SIZE;
    use crate::transport::{DeviceSim, ScriptedTransport};

    /// Simulated device that keeps answering after close, so one session
    /// can run jobs back to back.
    struct Reopening(ScriptedTransport);

    impl Transport for Reopening {
        async fn send_report(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()> {
            self.0.send_report(report).await
        }

        async fn recv_report(&mut self) -> Result<Vec<u8>> {
            self.0.recv_report().await
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn pages(n: usize) -> Vec<Page> {
        (0..n).map(|i| Page::new(vec![i as u8; 100])).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_pages_print_in_order() {
        let profile = Family::T5080.profile();
        let transport = ScriptedTransport::simulated(DeviceSim::new(profile));
        let log = transport.log();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = SessionOptions::new().with_event_channel(tx);
        let mut session = Session::new(profile, transport, options);

        let job = PrintJob::new(JobParams::default()).with_batch(pages(3));
        let outcome = session.run(job).await.unwrap();
        assert_eq!(outcome, Outcome::Success);

        let opcodes = log.opcodes();
        assert_eq!(opcodes[..5], [18, 17, 19, 17, 92]);
        assert_eq!(opcodes.iter().filter(|op| **op == 92).count(), 3);
        assert_eq!(opcodes.iter().filter(|op| **op == 16).count(), 3);
        // two bulk frames per 100-byte page
        assert_eq!(log.len(), opcodes.len() + 6);

        let mut sent = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let JobEvent::PageSent { page } = event {
                sent.push(page);
            }
        }
        assert_eq!(sent, vec![1, 2, 3]);
        assert!(session.into_transport().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cover_open_stops_before_data() {
        let profile = Family::G.profile();
        let sim = DeviceSim::new(profile).with_fault(FaultCode::CoverOpen, 2);
        let transport = ScriptedTransport::simulated(sim);
        let log = transport.log();
        let mut session = Session::new(profile, transport, SessionOptions::default());

        let job = PrintJob::new(JobParams::default()).with_batch(pages(1));
        let outcome = session.run(job).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure(ErrorKind::DeviceFault(FaultCode::CoverOpen))
        );
        assert_eq!(log.opcodes(), vec![17, 18]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let profile = Family::G.profile();
        let transport = ScriptedTransport::new(|_| None);
        let log = transport.log();
        let mut session = Session::new(profile, transport, SessionOptions::default());

        let started = Instant::now();
        let job = PrintJob::new(JobParams::default()).with_batch(pages(1));
        let outcome = session.run(job).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure(ErrorKind::CommandTimeout(WaitSite::Reply))
        );
        assert_eq!(log.opcodes(), vec![17; 4]);
        // four reply timeouts plus three re-send delays
        assert_eq!(
            started.elapsed(),
            Duration::from_millis(4 * 2000 + 3 * 500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_data_aborts() {
        let profile = Family::T5080.profile();
        let transport = ScriptedTransport::simulated(DeviceSim::new(profile));
        let log = transport.log();
        let mut session = Session::new(profile, transport, SessionOptions::default());
        session.control_handle().send(Control::Stop).await.unwrap();

        let job = PrintJob::new(JobParams::default()).with_batch(pages(2));
        let outcome = session.run(job).await.unwrap();
        assert_eq!(outcome, Outcome::Failure(ErrorKind::Aborted));
        assert!(!log.opcodes().contains(&92));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_stop_does_not_reach_next_job() {
        let profile = Family::T5080.profile();
        let transport = Reopening(ScriptedTransport::simulated(DeviceSim::new(profile)));
        let mut session = Session::new(profile, transport, SessionOptions::default());
        let control = session.control_handle();

        let job = PrintJob::new(JobParams::default()).with_batch(pages(1));
        assert_eq!(session.run(job).await.unwrap(), Outcome::Success);
        // arrives after the first job already ended
        control.send(Control::Stop).await.unwrap();

        let job = PrintJob::new(JobParams::default()).with_batch(pages(1));
        assert_eq!(session.run(job).await.unwrap(), Outcome::Success);
        assert_eq!(session.engine().step(), Step::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_busy_aborts_before_data() {
        let profile = Family::T5080.profile();
        let sim = DeviceSim::new(profile).with_busy_replies(2);
        let transport = ScriptedTransport::simulated(sim);
        let log = transport.log();
        let mut session = Session::new(profile, transport, SessionOptions::default());

        // lands while the engine waits out the busy poll delay
        let control = session.control_handle();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            control.send(Control::Stop).await.unwrap();
        });

        let job = PrintJob::new(JobParams::default()).with_batch(pages(2));
        let outcome = session.run(job).await.unwrap();
        stopper.await.unwrap();
        assert_eq!(outcome, Outcome::Failure(ErrorKind::Aborted));
        assert!(!log.opcodes().contains(&19));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dpi_query_returns_report() {
        let profile = Family::Sp.profile();
        let sim = DeviceSim::new(profile).with_send_data(576);
        let mut session = Session::new(
            profile,
            ScriptedTransport::simulated(sim),
            SessionOptions::default(),
        );
        let (outcome, report) = session
            .query(Query::ReadDpi { paper_type: 1 })
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(matches!(report, Some(Report::Dpi(dpi)) if (dpi - 11.666).abs() < 0.01));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_rejected_on_unsupported_family() {
        let profile = Family::G.profile();
        let mut session = Session::new(
            profile,
            ScriptedTransport::new(|_| None),
            SessionOptions::default(),
        );
        let err = session
            .query(Query::ReadDpi { paper_type: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, LabelPrinterError::Unsupported { .. }));
    }
}
