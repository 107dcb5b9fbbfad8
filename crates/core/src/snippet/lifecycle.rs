use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::command::SnippetCommand;
use super::executor::{ExecutionOutcome, SnippetExecutor};
use super::store::{SnippetStore, Transition};
use super::{describe_secs, truncate_for_display};
use crate::clock::Clock;
use crate::config::SnipgateCfg;
use crate::io::transport::{Transport, notify_best_effort};
use crate::types::{Destination, ProposalRequest, SnippetProposal};

pub const EXPIRED_NOTICE: &str = "Snippet expired. No changes made.";
pub const CANCELED_NOTICE: &str = "Snippet canceled. No changes made.";

/// Why a proposal was not stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("snippet has {lines} lines, the limit is {max}")]
    SizeExceeded { lines: usize, max: usize },
    #[error("snippet {existing} is already awaiting a decision in this thread")]
    AlreadyPending { existing: Uuid },
}

/// Result of a lifecycle keyword. Never an error: unknown or finished proposals are `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Confirmed { id: Uuid, execution: ExecutionOutcome },
    Canceled { id: Uuid },
    Extended { id: Uuid, expires_at: DateTime<Utc> },
    Expired { id: Uuid },
    NotFound,
}

/// Owns the propose / confirm / cancel / extend / expire state machine.
pub struct LifecycleManager {
    cfg: Arc<SnipgateCfg>,
    store: Arc<SnippetStore>,
    transport: Arc<dyn Transport>,
    executor: SnippetExecutor,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
    pub fn new(
        cfg: Arc<SnipgateCfg>,
        store: Arc<SnippetStore>,
        transport: Arc<dyn Transport>,
        executor: SnippetExecutor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            store,
            transport,
            executor,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<SnippetStore> {
        &self.store
    }

    pub fn has_pending(&self, destination: &Destination) -> bool {
        self.store.has_pending(destination)
    }

    /// Admit a payload for review.
    ///
    /// Oversized payloads and proposals into a thread that already has one pending are
    /// rejected without storing anything. On success the thread receives the proposal notice.
    pub async fn propose(&self, request: ProposalRequest) -> Result<Uuid, AdmissionError> {
        let lines = count_lines(&request.payload);
        if lines > self.cfg.max_payload_lines {
            tracing::info!(
                destination = %request.destination,
                lines,
                max = self.cfg.max_payload_lines,
                "snippet rejected: too large"
            );
            return Err(AdmissionError::SizeExceeded {
                lines,
                max: self.cfg.max_payload_lines,
            });
        }

        let proposal = SnippetProposal::new(request, self.clock.now(), self.cfg.expiry_window());
        let notice = self.proposal_notice(&proposal);
        let destination = proposal.destination.clone();

        let id = self.store.admit(proposal).map_err(|existing| {
            tracing::info!(destination = %destination, existing = %existing, "snippet rejected: already pending");
            AdmissionError::AlreadyPending { existing }
        })?;

        tracing::info!(snippet = %id, destination = %destination, lines, "snippet proposed");
        notify_best_effort(self.transport.as_ref(), &destination, &notice).await;
        Ok(id)
    }

    /// Apply a reserved keyword to the latest pending proposal in `destination`.
    pub async fn handle_command(&self, destination: &Destination, command: SnippetCommand) -> CommandOutcome {
        let now = self.clock.now();
        let transition = self
            .store
            .resolve(destination, now, command, self.cfg.extension());

        match transition {
            Transition::NotFound => {
                tracing::debug!(destination = %destination, %command, "no pending snippet");
                CommandOutcome::NotFound
            }
            Transition::Expired(p) => {
                tracing::info!(snippet = %p.id, destination = %destination, %command, "snippet expired before decision");
                notify_best_effort(self.transport.as_ref(), destination, EXPIRED_NOTICE).await;
                CommandOutcome::Expired { id: p.id }
            }
            Transition::Canceled(p) => {
                tracing::info!(snippet = %p.id, destination = %destination, "snippet canceled");
                notify_best_effort(self.transport.as_ref(), destination, CANCELED_NOTICE).await;
                CommandOutcome::Canceled { id: p.id }
            }
            Transition::Extended(p) => {
                tracing::info!(snippet = %p.id, destination = %destination, expires_at = %p.expires_at, "snippet extended");
                let text = format!(
                    "Snippet expiration extended to {} UTC.",
                    p.expires_at.format("%Y-%m-%d %H:%M:%S")
                );
                notify_best_effort(self.transport.as_ref(), destination, &text).await;
                CommandOutcome::Extended {
                    id: p.id,
                    expires_at: p.expires_at,
                }
            }
            Transition::Confirmed(p) => {
                // Already out of the store: tickers cannot touch it while it runs.
                tracing::info!(snippet = %p.id, destination = %destination, "snippet confirmed");
                let execution = self.executor.execute(&p.payload, destination).await;
                CommandOutcome::Confirmed { id: p.id, execution }
            }
        }
    }

    fn proposal_notice(&self, p: &SnippetProposal) -> String {
        let shown = truncate_for_display(p.payload.trim_end(), self.cfg.display_truncate_chars);
        format!(
            "Snippet proposal ID={id}\n\
             Request: {origin}\n\
             ```\n{shown}\n```\n\
             Summary: {summary}\n\
             Reply `confirm` to run it, `cancel` to discard it, or `extend` for {ext} more.\n\
             This proposal expires in {window}.",
            id = p.id,
            origin = p.origin_description,
            summary = p.summary,
            ext = describe_secs(self.cfg.extension_secs),
            window = describe_secs(self.cfg.proposal_expiry_secs),
        )
    }
}

/// Logical line count used for admission.
pub fn count_lines(payload: &str) -> usize {
    payload.trim().lines().count()
}
