use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::describe_secs;
use super::store::SnippetStore;
use crate::clock::Clock;
use crate::config::SnipgateCfg;
use crate::io::transport::{Transport, notify_best_effort};
use crate::types::SnippetProposal;

/// Last-resort action when a proposal outlives the hard timeout.
pub trait Terminator: Send + Sync {
    fn terminate(&self, overdue: &SnippetProposal);
}

/// Exits the process immediately with status 1. No destructors run, no tasks are drained;
/// an external supervisor is expected to restart the service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, _overdue: &SnippetProposal) {
        std::process::exit(1);
    }
}

/// Records which proposals would have terminated the process.
#[derive(Debug, Default)]
pub struct RecordingTerminator {
    fired: Mutex<Vec<Uuid>>,
}

impl RecordingTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fired(&self) -> Vec<Uuid> {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, overdue: &SnippetProposal) {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner).push(overdue.id);
    }
}

/// What one watchdog pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    pub warned: Vec<Uuid>,
    pub terminated: Option<Uuid>,
}

/// Escalates unattended proposals: one warning after `watchdog_warn_secs`, then, only when
/// `force_terminate_on_hard_timeout` is set, process termination after
/// `watchdog_hard_timeout_secs`.
pub struct WatchdogScheduler {
    cfg: Arc<SnipgateCfg>,
    store: Arc<SnippetStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    terminator: Arc<dyn Terminator>,
}

impl WatchdogScheduler {
    pub fn new(
        cfg: Arc<SnipgateCfg>,
        store: Arc<SnippetStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        Self {
            cfg,
            store,
            transport,
            clock,
            terminator,
        }
    }

    /// One watchdog pass.
    pub async fn sweep(&self) -> WatchdogReport {
        let now = self.clock.now();
        let mut report = WatchdogReport::default();

        for p in self.store.flag_unattended(now, self.cfg.warn_threshold()) {
            let age = p.age(now).num_seconds();
            tracing::warn!(snippet = %p.id, destination = %p.destination, age_secs = age, "snippet unattended");
            notify_best_effort(self.transport.as_ref(), &p.destination, &self.warning_text(&p, age)).await;
            report.warned.push(p.id);
        }

        if self.cfg.force_terminate_on_hard_timeout
            && let Some(p) = self.store.overdue(now, self.cfg.hard_timeout())
        {
            tracing::error!(
                snippet = %p.id,
                age_secs = p.age(now).num_seconds(),
                destination = %p.destination,
                origin = %p.origin_description,
                hard_timeout_secs = self.cfg.watchdog_hard_timeout_secs,
                "snippet unattended past hard timeout, terminating process"
            );
            report.terminated = Some(p.id);
            self.terminator.terminate(&p);
        }

        report
    }

    fn warning_text(&self, p: &SnippetProposal, age_secs: i64) -> String {
        let mut text = format!(
            "Warning: snippet ID={} has been waiting {age_secs}s for a decision. \
             Reply `confirm`, `cancel` or `extend`.",
            p.id
        );
        if self.cfg.force_terminate_on_hard_timeout {
            text.push_str(&format!(
                " The service will shut down if it is still undecided {} after it was proposed.",
                describe_secs(self.cfg.watchdog_hard_timeout_secs)
            ));
        }
        text
    }

    /// Run `sweep` every `watchdog_poll_secs` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.cfg.watchdog_poll_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("watchdog shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}
