//! Session driver against the simulated device, with paused tokio time.

use labelprinter::session::Control;
use labelprinter::{
    DeviceSim, ErrorKind, Family, JobEvent, JobParams, Outcome, Page, PrintJob, ScriptedTransport,
    Session, SessionOptions, TagPayload,
};
use tokio::sync::mpsc;

fn session(family: Family) -> (Session<ScriptedTransport>, labelprinter::transport::WriteLog) {
    let profile = family.profile();
    let transport = ScriptedTransport::simulated(DeviceSim::new(profile));
    let log = transport.log();
    (Session::new(profile, transport, SessionOptions::default()), log)
}

#[tokio::test(start_paused = true)]
async fn test_tag_with_secondary_segment_skips_printing() {
    let (mut session, log) = session(Family::T5080);
    let tag = TagPayload::new(vec![0x11; 100]).with_secondary(vec![0x22; 30]);
    let job = PrintJob::new(JobParams::default())
        .with_batch(vec![Page::new(vec![0xFF; 64])])
        .with_tag(tag);

    let outcome = session.run(job).await.unwrap();
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(log.opcodes(), vec![93, 93]);

    let reports = log.reports();
    // announce, two primary frames, announce, one secondary frame
    assert_eq!(reports.len(), 5);
    assert_eq!(u16::from_be_bytes([reports[0][2], reports[0][3]]), 100);
    assert_eq!(u16::from_be_bytes([reports[3][2], reports[3][3]]), 30);
    assert_eq!(reports[4][..30], [0x22; 30]);
    assert!(reports[4][30..].iter().all(|b| *b == 0));
}

#[tokio::test(start_paused = true)]
async fn test_tag_then_pages() {
    let (mut session, log) = session(Family::T5080);
    let job = PrintJob::new(JobParams::default())
        .with_batch(vec![Page::new(vec![0xFF; 64])])
        .with_tag(TagPayload::new(vec![0x11; 10]));

    let outcome = session.run(job).await.unwrap();
    assert_eq!(outcome, Outcome::Success);
    let opcodes = log.opcodes();
    assert_eq!(opcodes[..3], [93, 18, 17]);
    assert!(opcodes.contains(&92));
}

#[tokio::test(start_paused = true)]
async fn test_tag_rejected_without_tag_support() {
    let (mut session, log) = session(Family::Sp);
    let job = PrintJob::new(JobParams::default()).with_tag(TagPayload::new(vec![1]));
    assert!(session.run(job).await.is_err());
    assert!(log.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pushed_batch_is_printed() {
    let profile = Family::Tp.profile();
    let transport = ScriptedTransport::simulated(DeviceSim::new(profile));
    let log = transport.log();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        profile,
        transport,
        SessionOptions::new().with_event_channel(tx),
    );

    let control = session.control_handle();
    let watcher = tokio::spawn(async move {
        let mut pushed = false;
        let mut sent = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                JobEvent::BatchDrained if !pushed => {
                    pushed = true;
                    let page = Page::new(vec![0x0F; 80]);
                    control.send(Control::PushBatch(vec![page])).await.unwrap();
                }
                JobEvent::PageSent { page } => sent.push(page),
                _ => {}
            }
        }
        sent
    });

    let job = PrintJob::new(JobParams::default()).with_batch(vec![Page::new(vec![0xF0; 80])]);
    let outcome = session.run(job).await.unwrap();
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(log.opcodes().iter().filter(|op| **op == 90).count(), 2);

    drop(session);
    assert_eq!(watcher.await.unwrap(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_busy_device_rejected_before_start() {
    let profile = Family::G.profile();
    let sim = DeviceSim::new(profile).printing();
    let transport = ScriptedTransport::simulated(sim);
    let log = transport.log();
    let mut session = Session::new(profile, transport, SessionOptions::default());

    let job = PrintJob::new(JobParams::default()).with_batch(vec![Page::new(vec![1; 8])]);
    let outcome = session.run(job).await.unwrap();
    assert_eq!(outcome, Outcome::Failure(ErrorKind::DeviceBusy));
    assert_eq!(log.opcodes(), vec![17]);
}

#[tokio::test(start_paused = true)]
async fn test_transport_released_after_job() {
    let (mut session, _log) = session(Family::TpB);
    let job = PrintJob::new(JobParams::default()).with_batch(vec![Page::new(vec![0xFF; 20])]);
    assert!(session.run(job).await.unwrap().is_success());

    // a closed transport fails the next job instead of hanging
    let job = PrintJob::new(JobParams::default()).with_batch(vec![Page::new(vec![0xFF; 20])]);
    let outcome = session.run(job).await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failure(ErrorKind::TransportUnavailable(_))
    ));
    assert!(session.into_transport().is_closed());
}
