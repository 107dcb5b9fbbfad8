//! End-to-end lifecycle tests: proposal, decision keywords, watchdog and reaper sharing one
//! store under a manual clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use snipgate_core::clock::ManualClock;
use snipgate_core::config::SnipgateCfg;
use snipgate_core::io::transport::RecordingTransport;
use snipgate_core::snippet::lifecycle::{CANCELED_NOTICE, EXPIRED_NOTICE};
use snipgate_core::snippet::{
    AdmissionError, CommandOutcome, ExecError, ExpiryReaper, LifecycleManager, OutputCapture, PayloadRunner,
    RecordingTerminator, SnippetCommand, SnippetExecutor, SnippetStore, WatchdogScheduler,
};
use snipgate_core::types::{Destination, ProposalRequest};

const SUCCESS: &str = "Snippet executed successfully!";

/// Counts runs; optionally prints something and then fails.
#[derive(Default)]
struct TestRunner {
    runs: AtomicUsize,
    fail_with: Option<&'static str>,
}

#[async_trait::async_trait]
impl PayloadRunner for TestRunner {
    async fn run(&self, payload: &str, _: &Destination, capture: &OutputCapture) -> Result<(), ExecError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        capture.push(&format!("ran {} lines\n", payload.lines().count()));
        match self.fail_with {
            Some(msg) => Err(ExecError::Failed(msg.into())),
            None => Ok(()),
        }
    }
}

struct Harness {
    manager: Arc<LifecycleManager>,
    watchdog: WatchdogScheduler,
    reaper: ExpiryReaper,
    store: Arc<SnippetStore>,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
    runner: Arc<TestRunner>,
    terminator: Arc<RecordingTerminator>,
    t0: DateTime<Utc>,
}

impl Harness {
    fn new(cfg: SnipgateCfg) -> Self {
        Self::with_runner(cfg, TestRunner::default())
    }

    fn with_runner(cfg: SnipgateCfg, runner: TestRunner) -> Self {
        let t0 = Utc::now();
        let cfg = Arc::new(cfg);
        let store = Arc::new(SnippetStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::new(t0));
        let runner = Arc::new(runner);
        let terminator = Arc::new(RecordingTerminator::new());

        let executor = SnippetExecutor::new(runner.clone(), transport.clone());
        let manager = Arc::new(LifecycleManager::new(
            cfg.clone(),
            store.clone(),
            transport.clone(),
            executor,
            clock.clone(),
        ));
        let watchdog = WatchdogScheduler::new(
            cfg.clone(),
            store.clone(),
            transport.clone(),
            clock.clone(),
            terminator.clone(),
        );
        let reaper = ExpiryReaper::new(cfg.reaper_poll_secs, store.clone(), transport.clone(), clock.clone());

        Self {
            manager,
            watchdog,
            reaper,
            store,
            transport,
            clock,
            runner,
            terminator,
            t0,
        }
    }

    fn at(&self, offset: TimeDelta) {
        self.clock.set(self.t0 + offset);
    }

    fn runs(&self) -> usize {
        self.runner.runs.load(Ordering::SeqCst)
    }
}

fn dest() -> Destination {
    Destination::new("general", "1700000000.000100")
}

fn request(lines: usize) -> ProposalRequest {
    ProposalRequest {
        payload: (0..lines).map(|i| format!("echo line {i}")).collect::<Vec<_>>().join("\n"),
        summary: "prints numbered lines".into(),
        origin_description: "print some lines".into(),
        destination: dest(),
    }
}

// ── Scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn extended_proposal_still_expires_on_late_confirm() {
    let h = Harness::new(SnipgateCfg {
        max_payload_lines: 250,
        proposal_expiry_secs: 300,
        ..SnipgateCfg::default()
    });

    let p1 = h.manager.propose(request(10)).await.unwrap();
    let record = h.store.get(p1).unwrap();
    assert_eq!(record.expires_at, h.t0 + TimeDelta::minutes(5));

    h.at(TimeDelta::minutes(4));
    assert_eq!(
        h.manager.handle_command(&dest(), SnippetCommand::Extend).await,
        CommandOutcome::Extended {
            id: p1,
            expires_at: h.t0 + TimeDelta::minutes(9)
        }
    );
    assert!(h.manager.has_pending(&dest()));

    h.at(TimeDelta::minutes(9) + TimeDelta::seconds(1));
    assert_eq!(
        h.manager.handle_command(&dest(), SnippetCommand::Confirm).await,
        CommandOutcome::Expired { id: p1 }
    );
    assert!(h.store.get(p1).is_none());
    assert_eq!(h.runs(), 0);
}

#[tokio::test]
async fn oversized_payload_is_never_stored() {
    let h = Harness::new(SnipgateCfg::default());
    assert_eq!(
        h.manager.propose(request(300)).await,
        Err(AdmissionError::SizeExceeded { lines: 300, max: 250 })
    );
    assert!(!h.manager.has_pending(&dest()));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn watchdog_warns_exactly_once() {
    let h = Harness::new(SnipgateCfg {
        watchdog_warn_secs: 10,
        watchdog_hard_timeout_secs: 3600,
        force_terminate_on_hard_timeout: false,
        ..SnipgateCfg::default()
    });
    let p2 = h.manager.propose(request(1)).await.unwrap();
    h.transport.clear();

    h.at(TimeDelta::seconds(11));
    assert_eq!(h.watchdog.sweep().await.warned, vec![p2]);
    h.at(TimeDelta::seconds(22));
    assert!(h.watchdog.sweep().await.warned.is_empty());
    h.at(TimeDelta::seconds(33));
    assert!(h.watchdog.sweep().await.warned.is_empty());

    let texts = h.transport.texts_for(&dest());
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains(&p2.to_string()));
    assert!(h.store.get(p2).unwrap().alerted);
}

#[tokio::test]
async fn second_proposal_in_thread_is_rejected() {
    let h = Harness::new(SnipgateCfg::default());
    let p3 = h.manager.propose(request(2)).await.unwrap();
    assert_eq!(
        h.manager.propose(request(3)).await,
        Err(AdmissionError::AlreadyPending { existing: p3 })
    );
    assert!(h.manager.has_pending(&dest()));
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.store.pending_for(&dest()).unwrap().id, p3);
}

#[tokio::test]
async fn cancel_then_confirm_finds_nothing() {
    let h = Harness::new(SnipgateCfg::default());
    let p3 = h.manager.propose(request(2)).await.unwrap();
    assert_eq!(
        h.manager.handle_command(&dest(), SnippetCommand::Cancel).await,
        CommandOutcome::Canceled { id: p3 }
    );
    assert_eq!(
        h.manager.handle_command(&dest(), SnippetCommand::Confirm).await,
        CommandOutcome::NotFound
    );
    assert_eq!(h.transport.count_containing(CANCELED_NOTICE), 1);
    assert_eq!(h.runs(), 0);
}

// ── Properties ─────────────────────────────────────────────────

#[tokio::test]
async fn size_limit_is_inclusive() {
    let h = Harness::new(SnipgateCfg {
        max_payload_lines: 5,
        ..SnipgateCfg::default()
    });
    assert_eq!(
        h.manager.propose(request(6)).await,
        Err(AdmissionError::SizeExceeded { lines: 6, max: 5 })
    );
    assert!(h.store.is_empty());
    assert!(h.manager.propose(request(5)).await.is_ok());
}

#[tokio::test]
async fn each_extend_adds_one_increment() {
    let h = Harness::new(SnipgateCfg {
        extension_secs: 120,
        ..SnipgateCfg::default()
    });
    let id = h.manager.propose(request(1)).await.unwrap();
    let mut previous = h.store.get(id).unwrap().expires_at;
    for step in 1..=4 {
        h.at(TimeDelta::minutes(step));
        match h.manager.handle_command(&dest(), SnippetCommand::Extend).await {
            CommandOutcome::Extended { expires_at, .. } => {
                assert_eq!(expires_at, previous + TimeDelta::seconds(120));
                previous = expires_at;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn extend_does_not_rearm_the_warning() {
    let h = Harness::new(SnipgateCfg::default());
    h.manager.propose(request(1)).await.unwrap();
    h.at(TimeDelta::seconds(15));
    assert_eq!(h.watchdog.sweep().await.warned.len(), 1);
    h.manager.handle_command(&dest(), SnippetCommand::Extend).await;
    h.at(TimeDelta::seconds(45));
    assert!(h.watchdog.sweep().await.warned.is_empty());
}

#[tokio::test]
async fn warned_proposal_is_later_reaped() {
    let h = Harness::new(SnipgateCfg::default());
    let id = h.manager.propose(request(1)).await.unwrap();
    h.at(TimeDelta::seconds(20));
    h.watchdog.sweep().await;
    h.at(TimeDelta::minutes(5));
    assert!(h.reaper.sweep().await.is_empty());
    h.at(TimeDelta::minutes(5) + TimeDelta::seconds(1));
    assert_eq!(h.reaper.sweep().await, vec![id]);
    assert_eq!(
        h.manager.handle_command(&dest(), SnippetCommand::Confirm).await,
        CommandOutcome::NotFound
    );
    assert_eq!(h.transport.count_containing("expired with no final decision"), 1);
}

#[tokio::test]
async fn failed_payload_reports_partial_output_first() {
    let h = Harness::with_runner(
        SnipgateCfg::default(),
        TestRunner {
            runs: AtomicUsize::new(0),
            fail_with: Some("permission denied"),
        },
    );
    h.manager.propose(request(3)).await.unwrap();
    h.transport.clear();

    match h.manager.handle_command(&dest(), SnippetCommand::Confirm).await {
        CommandOutcome::Confirmed { execution, .. } => {
            assert_eq!(execution.output, "ran 3 lines\n");
            assert_eq!(execution.error.as_deref(), Some("permission denied"));
        }
        other => panic!("unexpected {other:?}"),
    }
    let texts = h.transport.texts_for(&dest());
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("ran 3 lines"));
    assert!(texts[1].contains("permission denied"));
    assert!(!h.manager.has_pending(&dest()));
}

#[tokio::test]
async fn hard_timeout_only_terminates_when_enabled() {
    let off = Harness::new(SnipgateCfg {
        proposal_expiry_secs: 86_400,
        ..SnipgateCfg::default()
    });
    off.manager.propose(request(1)).await.unwrap();
    off.at(TimeDelta::hours(2));
    off.watchdog.sweep().await;
    assert!(off.terminator.fired().is_empty());

    let on = Harness::new(SnipgateCfg {
        proposal_expiry_secs: 86_400,
        force_terminate_on_hard_timeout: true,
        ..SnipgateCfg::default()
    });
    let id = on.manager.propose(request(1)).await.unwrap();
    on.at(TimeDelta::minutes(59));
    on.watchdog.sweep().await;
    assert!(on.terminator.fired().is_empty());
    on.at(TimeDelta::hours(2));
    on.watchdog.sweep().await;
    assert_eq!(on.terminator.fired(), vec![id]);
}

// ── Races ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirm_and_cancel_commit_once() {
    for _ in 0..20 {
        let h = Harness::new(SnipgateCfg::default());
        h.manager.propose(request(1)).await.unwrap();
        h.transport.clear();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let manager = h.manager.clone();
            let cmd = if i % 2 == 0 { SnippetCommand::Confirm } else { SnippetCommand::Cancel };
            tasks.push(tokio::spawn(async move { manager.handle_command(&dest(), cmd).await }));
        }
        let mut winners = 0;
        for t in tasks {
            if t.await.unwrap() != CommandOutcome::NotFound {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        let terminal_notices = h.transport.count_containing(SUCCESS) + h.transport.count_containing(CANCELED_NOTICE);
        assert_eq!(terminal_notices, 1);
        assert!(h.runs() <= 1);
        assert!(h.store.is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_confirm_racing_reaper_expires_once() {
    for _ in 0..20 {
        let h = Arc::new(Harness::new(SnipgateCfg::default()));
        let id = h.manager.propose(request(1)).await.unwrap();
        h.transport.clear();
        h.at(TimeDelta::minutes(5) + TimeDelta::seconds(1));

        let reaper_side = {
            let h = h.clone();
            tokio::spawn(async move { h.reaper.sweep().await })
        };
        let confirm_side = {
            let h = h.clone();
            tokio::spawn(async move { h.manager.handle_command(&dest(), SnippetCommand::Confirm).await })
        };
        let reaped = reaper_side.await.unwrap();
        let outcome = confirm_side.await.unwrap();

        match outcome {
            CommandOutcome::Expired { id: got } => {
                assert_eq!(got, id);
                assert!(reaped.is_empty());
            }
            CommandOutcome::NotFound => assert_eq!(reaped, vec![id]),
            other => panic!("confirm must never win after expiry: {other:?}"),
        }
        let notices = h.transport.count_containing(EXPIRED_NOTICE)
            + h.transport.count_containing("expired with no final decision");
        assert_eq!(notices, 1);
        assert_eq!(h.runs(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_extend_racing_reaper_expires_once() {
    for _ in 0..20 {
        let h = Arc::new(Harness::new(SnipgateCfg::default()));
        let id = h.manager.propose(request(1)).await.unwrap();
        h.transport.clear();
        h.at(TimeDelta::minutes(5) + TimeDelta::seconds(1));

        let reaper_side = {
            let h = h.clone();
            tokio::spawn(async move { h.reaper.sweep().await })
        };
        let extend_side = {
            let h = h.clone();
            tokio::spawn(async move { h.manager.handle_command(&dest(), SnippetCommand::Extend).await })
        };
        let reaped = reaper_side.await.unwrap();
        let outcome = extend_side.await.unwrap();

        match outcome {
            CommandOutcome::Expired { id: got } => {
                assert_eq!(got, id);
                assert!(reaped.is_empty());
            }
            CommandOutcome::NotFound => assert_eq!(reaped, vec![id]),
            other => panic!("extend must never revive an expired snippet: {other:?}"),
        }
        let notices = h.transport.count_containing(EXPIRED_NOTICE)
            + h.transport.count_containing("expired with no final decision");
        assert_eq!(notices, 1);
        assert_eq!(h.transport.count_containing("expiration extended"), 0);
        assert!(h.store.get(id).is_none());
        assert!(!h.manager.has_pending(&dest()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_proposals_admit_one() {
    let h = Harness::new(SnipgateCfg::default());
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = h.manager.clone();
        tasks.push(tokio::spawn(async move { manager.propose(request(2)).await }));
    }
    let mut admitted = Vec::new();
    let mut rejected = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(id) => admitted.push(id),
            Err(AdmissionError::AlreadyPending { .. }) => rejected += 1,
            Err(e) => panic!("unexpected {e}"),
        }
    }
    assert_eq!(admitted.len(), 1);
    assert_eq!(rejected, 15);
    assert_eq!(h.store.len(), 1);
}
