//! Agent runtime: the shared context and the single worker that drains the
//! notification queue.

use std::future::Future;
use std::sync::Arc;

use ovs_agent_common::{AgentError, AgentResult};
use ovsdb_client::RowEvent;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::watcher::{logical_port_of, BindingWatcher, HandleOutcome};

/// Configuration and shutdown signal handed to every component.
///
/// `cancel` aborts in-flight device and database operations. It is only
/// triggered once the shutdown grace period has run out.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub cancel: CancellationToken,
}

impl AgentContext {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }
}

/// Counters for one worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub bound: u64,
    pub unbound: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &HandleOutcome) {
        self.processed += 1;
        match outcome {
            HandleOutcome::Bound(_) => self.bound += 1,
            HandleOutcome::Unbound(_) => self.unbound += 1,
            HandleOutcome::Skipped(_) => self.skipped += 1,
            HandleOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Why [`Agent::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future resolved.
    Shutdown,
    /// The notification channel closed, e.g. the Southbound connection
    /// dropped.
    StreamEnded,
    /// The worker task panicked.
    WorkerAborted,
}

/// Result of one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub stats: WorkerStats,
}

impl RunOutcome {
    /// Stats of a run stopped by shutdown; an error for any other stop.
    pub fn into_result(self) -> AgentResult<WorkerStats> {
        match self.reason {
            StopReason::Shutdown => Ok(self.stats),
            StopReason::StreamEnded => Err(AgentError::protocol(
                "notification stream",
                "Southbound connection closed",
            )),
            StopReason::WorkerAborted => Err(AgentError::protocol(
                "notification stream",
                "worker task aborted",
            )),
        }
    }
}

/// Single-worker runtime that feeds notifications to the watcher.
pub struct Agent {
    ctx: AgentContext,
    watcher: BindingWatcher,
}

impl Agent {
    /// Creates an agent running `watcher` under `ctx`.
    pub fn new(ctx: AgentContext, watcher: BindingWatcher) -> Self {
        Self { ctx, watcher }
    }

    /// Processes `events` until the queue closes or `shutdown` resolves.
    ///
    /// On shutdown no new event is started; an event already being handled
    /// gets the configured grace period before its operations are
    /// cancelled.
    pub async fn run_until<S>(self, events: mpsc::Receiver<RowEvent>, shutdown: S) -> RunOutcome
    where
        S: Future<Output = ()>,
    {
        let Agent { ctx, watcher } = self;
        let intake = CancellationToken::new();
        let mut worker = tokio::spawn(worker_loop(watcher, events, intake.clone()));

        tokio::select! {
            res = &mut worker => {
                warn!("Notification stream ended");
                return finished(StopReason::StreamEnded, res);
            }
            _ = shutdown => {
                info!("Shutdown requested, stopping intake");
            }
        }

        intake.cancel();
        let grace = ctx.config.shutdown_grace();
        match tokio::time::timeout(grace, &mut worker).await {
            Ok(res) => finished(StopReason::Shutdown, res),
            Err(_) => {
                warn!("In-flight binding still running after {:?}, cancelling", grace);
                ctx.cancel.cancel();
                finished(StopReason::Shutdown, worker.await)
            }
        }
    }
}

fn finished(reason: StopReason, res: Result<WorkerStats, JoinError>) -> RunOutcome {
    match res {
        Ok(stats) => RunOutcome { reason, stats },
        Err(e) => {
            error!("Worker task failed: {}", e);
            RunOutcome {
                reason: StopReason::WorkerAborted,
                stats: WorkerStats::default(),
            }
        }
    }
}

async fn worker_loop(
    watcher: BindingWatcher,
    mut events: mpsc::Receiver<RowEvent>,
    intake: CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        let event = tokio::select! {
            biased;
            _ = intake.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        debug!(
            table = %event.table,
            uuid = %event.uuid,
            kind = ?event.kind,
            logical_port = logical_port_of(&event.row),
            "Processing change"
        );
        let outcome = watcher.handle(&event).await;
        stats.record(&outcome);
    }
    info!(
        processed = stats.processed,
        bound = stats.bound,
        unbound = stats.unbound,
        failed = stats.failed,
        "Worker stopped"
    );
    stats
}
