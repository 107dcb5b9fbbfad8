use std::sync::Arc;
use std::time::Duration;

use snipgate_llm::provider::LlmProvider;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::shutdown::ShutdownGuard;
use crate::clock::{Clock, SystemClock};
use crate::config::SnipgateCfg;
use crate::io::input::{self, InputReceiver, InputSender};
use crate::io::output::{self, OutputReceiver};
use crate::io::transport::{ChannelTransport, Transport};
use crate::oracle::{Classifier, Generator, LlmOracle, Responder};
use crate::persona::PersonaRegistry;
use crate::router::RequestRouter;
use crate::snippet::{
    ExpiryReaper, LifecycleManager, PayloadRunner, ProcessTerminator, ShellRunner, SnippetExecutor, SnippetStore,
    Terminator, WatchdogScheduler,
};

/// Collaborators the service is assembled from.
pub struct Dependencies {
    pub clock: Arc<dyn Clock>,
    pub runner: Arc<dyn PayloadRunner>,
    pub terminator: Arc<dyn Terminator>,
    pub classifier: Arc<dyn Classifier>,
    pub generator: Arc<dyn Generator>,
    pub responder: Arc<dyn Responder>,
}

impl Dependencies {
    /// Wall clock, shell runner, real process termination and one LLM for every oracle.
    pub fn production(cfg: &SnipgateCfg, provider: Arc<dyn LlmProvider>) -> Self {
        let oracle = Arc::new(LlmOracle::new(provider, cfg.history_turns).with_thread_limit(cfg.history_threads));
        Self {
            clock: Arc::new(SystemClock),
            runner: Arc::new(ShellRunner::new(cfg.payload_memory_mb)),
            terminator: Arc::new(ProcessTerminator),
            classifier: oracle.clone(),
            generator: oracle.clone(),
            responder: oracle,
        }
    }
}

/// Wires the router, the lifecycle manager and both background tickers together.
pub struct Service {
    cfg: Arc<SnipgateCfg>,
    router: Arc<RequestRouter>,
    lifecycle: Arc<LifecycleManager>,
    watchdog: Arc<WatchdogScheduler>,
    reaper: Arc<ExpiryReaper>,
    inbound_rx: InputReceiver,
    shutdown: ShutdownGuard,
}

impl Service {
    /// Create a service delivering notices on an output channel.
    /// Returns (Service, inbound_sender, output_receiver).
    pub fn new(cfg: Arc<SnipgateCfg>, deps: Dependencies) -> (Self, InputSender, OutputReceiver) {
        let (output_tx, output_rx) = output::channel(cfg.outbound_buffer);
        let transport: Arc<dyn Transport> = Arc::new(ChannelTransport::new(output_tx));
        let (service, inbound_tx) = Self::with_transport(cfg, deps, transport);
        (service, inbound_tx, output_rx)
    }

    /// Create a service delivering notices through `transport`.
    pub fn with_transport(
        cfg: Arc<SnipgateCfg>,
        deps: Dependencies,
        transport: Arc<dyn Transport>,
    ) -> (Self, InputSender) {
        let (inbound_tx, inbound_rx) = input::channel(cfg.inbound_buffer);
        let store = Arc::new(SnippetStore::new());
        let executor = SnippetExecutor::new(deps.runner, transport.clone())
            .with_display_limit(cfg.display_truncate_chars)
            .with_output_limit(cfg.max_output_bytes);
        let lifecycle = Arc::new(LifecycleManager::new(
            cfg.clone(),
            store.clone(),
            transport.clone(),
            executor,
            deps.clock.clone(),
        ));
        let watchdog = Arc::new(WatchdogScheduler::new(
            cfg.clone(),
            store.clone(),
            transport.clone(),
            deps.clock.clone(),
            deps.terminator,
        ));
        let reaper = Arc::new(ExpiryReaper::new(
            cfg.reaper_poll_secs,
            store,
            transport.clone(),
            deps.clock,
        ));
        let router = Arc::new(RequestRouter::new(
            lifecycle.clone(),
            deps.classifier,
            deps.generator,
            deps.responder,
            Arc::new(PersonaRegistry::new()),
            transport,
        ));

        let service = Self {
            cfg,
            router,
            lifecycle,
            watchdog,
            reaper,
            inbound_rx,
            shutdown: ShutdownGuard::new(),
        };
        (service, inbound_tx)
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        self.lifecycle.clone()
    }

    /// Route inbound messages until the channel closes or shutdown is triggered,
    /// then stop the tickers and give in-flight messages `shutdown_timeout_secs` to finish.
    pub async fn run(mut self) {
        self.shutdown.spawn_signal_listener();
        let token = self.shutdown.token();

        let watchdog = self.watchdog.clone().spawn(token.clone());
        let reaper = self.reaper.clone().spawn(token.clone());
        tracing::info!(
            watchdog_poll_secs = self.cfg.watchdog_poll_secs,
            reaper_poll_secs = self.cfg.reaper_poll_secs,
            force_terminate = self.cfg.force_terminate_on_hard_timeout,
            "snipgate service started"
        );

        let mut inflight = JoinSet::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(done) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = done {
                        tracing::error!(error = %e, "message handler crashed");
                    }
                }
                msg = self.inbound_rx.recv() => {
                    let Some(msg) = msg else {
                        break;
                    };
                    let router = self.router.clone();
                    inflight.spawn(async move {
                        let outcome = router.route(msg).await;
                        tracing::debug!(?outcome, "message routed");
                    });
                }
            }
        }

        token.cancel();
        for (name, handle) in [("watchdog", watchdog), ("reaper", reaper)] {
            if let Err(e) = handle.await {
                tracing::warn!(task = name, error = %e, "ticker ended abnormally");
            }
        }

        let grace = Duration::from_secs(self.cfg.shutdown_timeout_secs);
        let drained = tokio::time::timeout(grace, async {
            while inflight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(pending = inflight.len(), "shutdown timeout, aborting in-flight messages");
            inflight.abort_all();
        }
        tracing::info!("snipgate service stopped");
    }
}
