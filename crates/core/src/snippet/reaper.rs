use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::SnippetStore;
use crate::clock::Clock;
use crate::io::transport::{Transport, notify_best_effort};

/// Expires proposals whose deadline passed with nobody answering.
pub struct ExpiryReaper {
    poll: Duration,
    store: Arc<SnippetStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl ExpiryReaper {
    pub fn new(
        poll_secs: u64,
        store: Arc<SnippetStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            poll: Duration::from_secs(poll_secs.max(1)),
            store,
            transport,
            clock,
        }
    }

    /// Remove and announce every expired proposal. Returns the reaped ids.
    pub async fn sweep(&self) -> Vec<Uuid> {
        let reaped = self.store.reap_expired(self.clock.now());
        let mut ids = Vec::with_capacity(reaped.len());
        for p in reaped {
            tracing::info!(snippet = %p.id, destination = %p.destination, "snippet reaped");
            let text = format!(
                "Snippet ID={} expired with no final decision. No changes applied.",
                p.id
            );
            notify_best_effort(self.transport.as_ref(), &p.destination, &text).await;
            ids.push(p.id);
        }
        ids
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("expiry reaper shutting down");
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
