//! Outbox poller.
//!
//! Each cycle claims up to `limit` due events in a short transaction, runs
//! their handlers as concurrent tasks and waits for all of them before
//! sleeping for `interval`. The claim locks are released when the claim
//! commits, so a single poller per database is the supported deployment.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OutboxId, OutboxStatus};
use store::{OutboxEntry, UnitOfWork};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::{HandlerContext, Services};
use crate::error::{Result, WorkflowError};
use crate::handlers::HandlerRegistry;
use crate::outcome::HandlerOutcome;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum events claimed per cycle.
    pub limit: i64,
    /// Pause between cycles.
    pub interval: Duration,
    /// How long a deferred event stays hidden from claims. Zero retries it
    /// on the next cycle.
    pub defer_delay: Duration,
    /// Deadline of one handler invocation.
    pub handler_timeout: Duration,
    /// Deadline for recording an event's status.
    pub status_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            interval: Duration::from_secs(5),
            defer_delay: Duration::from_secs(15),
            handler_timeout: Duration::from_secs(600),
            status_timeout: Duration::from_secs(3),
        }
    }
}

/// What happened to one claimed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryResult {
    Processed,
    Failed,
    Deferred,
    /// The handler task panicked or the status update did not commit. The
    /// event is still `NotProcessed`.
    Abandoned,
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub claimed: usize,
    pub processed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub abandoned: usize,
}

impl PollReport {
    fn record(&mut self, result: EntryResult) {
        match result {
            EntryResult::Processed => self.processed += 1,
            EntryResult::Failed => self.failed += 1,
            EntryResult::Deferred => self.deferred += 1,
            EntryResult::Abandoned => self.abandoned += 1,
        }
    }
}

/// Drives outbox events through their handlers.
#[derive(Clone)]
pub struct OutboxPoller {
    services: Arc<Services>,
    registry: Arc<HandlerRegistry>,
    config: PollerConfig,
    abort: CancellationToken,
}

impl OutboxPoller {
    pub fn new(services: Arc<Services>, registry: HandlerRegistry, config: PollerConfig) -> Self {
        Self {
            services,
            registry: Arc::new(registry),
            config,
            abort: CancellationToken::new(),
        }
    }

    /// Token that cancels in-flight handlers when triggered.
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Polls until `shutdown` is cancelled. A running cycle is always
    /// completed first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            limit = self.config.limit,
            interval = ?self.config.interval,
            "Outbox poller started"
        );
        while !shutdown.is_cancelled() {
            if let Err(e) = self.poll_once().await {
                tracing::error!(error = %e, "Outbox poll failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        tracing::info!("Outbox poller stopped");
    }

    /// Runs one claim and dispatch cycle.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let entries = self.claim().await?;
        let mut report = PollReport {
            claimed: entries.len(),
            ..PollReport::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }
        metrics::counter!("outbox_claimed_total").increment(entries.len() as u64);
        tracing::debug!(claimed = entries.len(), "Outbox events claimed");

        let mut tasks = JoinSet::new();
        for entry in entries {
            let poller = self.clone();
            tasks.spawn(async move { poller.process(entry).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.record(result),
                Err(e) => {
                    tracing::error!(error = %e, "Handler task failed");
                    report.record(EntryResult::Abandoned);
                }
            }
        }
        Ok(report)
    }

    async fn claim(&self) -> Result<Vec<OutboxEntry>> {
        let mut uow = UnitOfWork::start(self.services.db.clone()).await?;
        let entries = uow.tx()?.claim_batch(self.config.limit).await?;
        uow.commit().await?;
        Ok(entries)
    }

    #[tracing::instrument(skip_all, fields(outbox_id = %entry.id, event = %entry.event))]
    async fn process(&self, entry: OutboxEntry) -> EntryResult {
        let started = Instant::now();
        let outcome = match self.registry.get(&entry.event) {
            Some(handler) => {
                let ctx = HandlerContext::new(
                    self.services.clone(),
                    self.config.handler_timeout,
                    self.abort.clone(),
                );
                handler.handle(&ctx, &entry).await
            }
            None => HandlerOutcome::failed(WorkflowError::UnknownEvent(entry.event.clone())),
        };
        metrics::histogram!("outbox_handler_duration_seconds", "event" => entry.event.clone())
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            "outbox_events_total",
            "event" => entry.event.clone(),
            "outcome" => outcome.label()
        )
        .increment(1);

        let (result, recorded) = match outcome {
            HandlerOutcome::Processed(uow) => (
                EntryResult::Processed,
                self.set_status(uow, entry.id, OutboxStatus::Processed)
                    .await,
            ),
            HandlerOutcome::Failed { uow, error } => {
                tracing::error!(error = %error, "Event failed");
                if let Some(uow) = uow {
                    if let Err(e) = uow.rollback().await {
                        tracing::warn!(error = %e, "Rollback of failed handler work failed");
                    }
                }
                let uow = UnitOfWork::new(self.services.db.clone());
                (
                    EntryResult::Failed,
                    self.set_status(uow, entry.id, OutboxStatus::Failed).await,
                )
            }
            HandlerOutcome::DeferNow => {
                tracing::debug!("Event deferred");
                (EntryResult::Deferred, self.defer(entry.id).await)
            }
            HandlerOutcome::DeferBecause(reason) => {
                tracing::warn!(reason = %reason, "Event deferred");
                (EntryResult::Deferred, self.defer(entry.id).await)
            }
        };

        match recorded {
            Ok(()) => result,
            Err(e) if result == EntryResult::Deferred => {
                tracing::warn!(error = %e, "Deferral back-off not recorded");
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "Event status not recorded, event will be retried");
                EntryResult::Abandoned
            }
        }
    }

    /// Records `status` inside `uow`, beginning it if needed, and commits.
    /// Dropping the unit of work on error or timeout rolls it back.
    async fn set_status(
        &self,
        mut uow: UnitOfWork,
        id: OutboxId,
        status: OutboxStatus,
    ) -> Result<()> {
        let write = async move {
            if !uow.is_active() {
                uow.begin().await?;
            }
            uow.tx()?.set_status(id, status).await?;
            uow.commit().await?;
            Ok::<_, WorkflowError>(())
        };
        self.with_status_timeout(write).await
    }

    async fn defer(&self, id: OutboxId) -> Result<()> {
        if self.config.defer_delay.is_zero() {
            return Ok(());
        }
        let until = chrono::Duration::from_std(self.config.defer_delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let db = self.services.db.clone();
        let write = async move {
            let mut uow = UnitOfWork::start(db).await?;
            uow.tx()?.defer_until(id, until).await?;
            uow.commit().await?;
            Ok::<_, WorkflowError>(())
        };
        self.with_status_timeout(write).await
    }

    async fn with_status_timeout(
        &self,
        write: impl std::future::Future<Output = Result<()>>,
    ) -> Result<()> {
        match tokio::time::timeout(self.config.status_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::Timeout {
                operation: "outbox.set_status",
                after: self.config.status_timeout,
            }),
        }
    }
}
