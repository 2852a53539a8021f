//! Outbox processor owned by the server lifecycle.
//!
//! Each cycle fetches the oldest pending rows, publishes them one at a time
//! in order, and persists every outcome in a single batch. A failed row stays
//! pending with its attempt count raised and does not block the rows after
//! it. Cancellation is observed between rows and while sleeping; a publish
//! already in flight runs to completion so its outcome can be recorded.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::repos::{OutboxRepo, RepoError};
use crate::config::OutboxSettings;
use crate::domain::outbox::{DeliveryOutcome, OutboxMessage, attempts_reached};

use super::publisher::MessagePublisher;

const SOURCE: &str = "application::outbox";

pub const METRIC_OUTBOX_PUBLISHED_TOTAL: &str = "itemsvc_outbox_published_total";
pub const METRIC_OUTBOX_FAILED_TOTAL: &str = "itemsvc_outbox_failed_total";
pub const METRIC_OUTBOX_DEAD_LETTERED_TOTAL: &str = "itemsvc_outbox_dead_lettered_total";
pub const METRIC_OUTBOX_PURGED_TOTAL: &str = "itemsvc_outbox_purged_total";
pub const METRIC_OUTBOX_CYCLE_MS: &str = "itemsvc_outbox_cycle_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub poll_interval: Duration,
    pub batch_size: NonZeroU32,
    /// `None` retries forever.
    pub max_attempts: Option<NonZeroU32>,
    /// `None` keeps processed rows forever.
    pub retention: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: NonZeroU32::new(50).unwrap_or(NonZeroU32::MIN),
            max_attempts: NonZeroU32::new(50),
            retention: Some(Duration::from_secs(168 * 3600)),
        }
    }
}

impl From<&OutboxSettings> for ProcessorConfig {
    fn from(settings: &OutboxSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            batch_size: settings.batch_size,
            max_attempts: settings.max_attempts,
            retention: settings.retention,
        }
    }
}

/// Observable lifecycle of the processor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Running,
    Draining { batch: usize },
    Persisting,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Failed rows that used up their last attempt in this cycle.
    pub dead_lettered: usize,
    pub purged: u64,
    /// Cancellation stopped the cycle before every fetched row was tried.
    pub interrupted: bool,
}

pub struct OutboxProcessor {
    outbox: Arc<dyn OutboxRepo>,
    publisher: Arc<dyn MessagePublisher>,
    config: ProcessorConfig,
    state: watch::Sender<ProcessorState>,
}

impl OutboxProcessor {
    pub fn new(
        outbox: Arc<dyn OutboxRepo>,
        publisher: Arc<dyn MessagePublisher>,
        config: ProcessorConfig,
    ) -> Self {
        let (state, _) = watch::channel(ProcessorState::Idle);
        Self {
            outbox,
            publisher,
            config,
            state,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    /// Runs one cycle over the oldest pending rows.
    ///
    /// Store failures abort the cycle. Rows published before a failed
    /// persist remain pending and are published again later.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, RepoError> {
        let started_at = Instant::now();
        let mut report = CycleReport::default();
        self.set_state(ProcessorState::Running);

        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.interrupted = true;
                return Ok(report);
            }
            batch = self
                .outbox
                .fetch_pending(self.config.batch_size.get(), self.config.max_attempts) => batch?,
        };
        report.fetched = batch.len();

        if !batch.is_empty() {
            self.set_state(ProcessorState::Draining { batch: batch.len() });
            let mut outcomes = Vec::with_capacity(batch.len());
            let mut exhausted = Vec::new();
            for message in &batch {
                if cancel.is_cancelled() {
                    report.interrupted = true;
                    break;
                }
                let outcome = self.deliver(message).await;
                if let Some(dead) = self.tally(message, &outcome, &mut report) {
                    exhausted.push(dead);
                }
                outcomes.push(outcome);
            }

            self.set_state(ProcessorState::Persisting);
            self.outbox.record_outcomes(&outcomes).await?;
            // Only parked once the raised attempt count is stored.
            for dead in &exhausted {
                dead.announce();
            }
        }

        if let Some(retention) = self.config.retention {
            report.purged = self.purge(retention).await;
        }

        histogram!(METRIC_OUTBOX_CYCLE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        Ok(report)
    }

    /// Loops until `cancel` fires, sleeping `poll_interval` between cycles.
    pub async fn run(self, cancel: CancellationToken) {
        match self.outbox.count_pending().await {
            Ok(pending) => info!(
                target = SOURCE,
                pending,
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                batch_size = self.config.batch_size.get(),
                "Outbox processor started"
            ),
            Err(err) => warn!(
                target = SOURCE,
                error = %err,
                "Outbox processor started without a pending count"
            ),
        }

        while !cancel.is_cancelled() {
            match self.run_cycle(&cancel).await {
                Ok(report) if report.fetched > 0 || report.purged > 0 => info!(
                    target = SOURCE,
                    fetched = report.fetched,
                    delivered = report.delivered,
                    failed = report.failed,
                    dead_lettered = report.dead_lettered,
                    purged = report.purged,
                    interrupted = report.interrupted,
                    "Outbox cycle finished"
                ),
                Ok(_) => debug!(target = SOURCE, "Outbox cycle found nothing pending"),
                Err(err) => error!(
                    target = SOURCE,
                    error = %err,
                    "Outbox cycle failed; retrying after the poll interval"
                ),
            }

            self.set_state(ProcessorState::Sleeping);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.set_state(ProcessorState::Stopped);
        info!(target = SOURCE, "Outbox processor stopped");
    }

    /// Starts the processor on the runtime. The returned handle owns its shutdown.
    pub fn spawn(self, cancel: CancellationToken) -> OutboxProcessorHandle {
        let state = self.subscribe();
        let token = cancel.clone();
        let task = tokio::spawn(self.run(token));
        OutboxProcessorHandle {
            cancel,
            state,
            task,
        }
    }

    async fn deliver(&self, message: &OutboxMessage) -> DeliveryOutcome {
        if let Err(err) = message.decode() {
            return DeliveryOutcome::Failed {
                id: message.id,
                error: err.to_string(),
            };
        }

        match self
            .publisher
            .publish(&message.event_type, &message.content)
            .await
        {
            Ok(()) => DeliveryOutcome::Delivered {
                id: message.id,
                at: OffsetDateTime::now_utc(),
            },
            Err(err) => DeliveryOutcome::Failed {
                id: message.id,
                error: err.to_string(),
            },
        }
    }

    /// Counts the outcome. Returns the row when this failure used its last attempt.
    fn tally(
        &self,
        message: &OutboxMessage,
        outcome: &DeliveryOutcome,
        report: &mut CycleReport,
    ) -> Option<DeadLetter> {
        let event_type = message.event_type.clone();
        let DeliveryOutcome::Failed { error: reason, .. } = outcome else {
            report.delivered += 1;
            counter!(METRIC_OUTBOX_PUBLISHED_TOTAL, "event_type" => event_type).increment(1);
            return None;
        };

        report.failed += 1;
        counter!(METRIC_OUTBOX_FAILED_TOTAL, "event_type" => event_type.clone()).increment(1);

        let attempts = message.attempts.saturating_add(1);
        match self.config.max_attempts {
            Some(max) if attempts_reached(attempts, max) => {
                report.dead_lettered += 1;
                Some(DeadLetter {
                    message_id: message.id,
                    event_type,
                    attempts,
                    error: reason.clone(),
                })
            }
            _ => {
                warn!(
                    target = SOURCE,
                    message_id = message.id,
                    event_type = %event_type,
                    attempts,
                    error = %reason,
                    "Outbox message publish failed"
                );
                None
            }
        }
    }

    async fn purge(&self, retention: Duration) -> u64 {
        let cutoff = time::Duration::try_from(retention)
            .ok()
            .and_then(|retention| OffsetDateTime::now_utc().checked_sub(retention));
        let Some(before) = cutoff else {
            debug!(
                target = SOURCE,
                retention_secs = retention.as_secs(),
                "Retention window reaches past the earliest date; nothing to purge"
            );
            return 0;
        };
        match self.outbox.purge_processed(before).await {
            Ok(purged) => {
                if purged > 0 {
                    counter!(METRIC_OUTBOX_PURGED_TOTAL).increment(purged);
                }
                purged
            }
            Err(err) => {
                warn!(target = SOURCE, error = %err, "Outbox purge failed");
                0
            }
        }
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.send_replace(state);
    }
}

/// A row whose failure used its last attempt, announced after the cycle persisted.
struct DeadLetter {
    message_id: i64,
    event_type: String,
    attempts: i32,
    error: String,
}

impl DeadLetter {
    fn announce(&self) {
        counter!(METRIC_OUTBOX_DEAD_LETTERED_TOTAL, "event_type" => self.event_type.clone())
            .increment(1);
        error!(
            target = SOURCE,
            message_id = self.message_id,
            event_type = %self.event_type,
            attempts = self.attempts,
            error = %self.error,
            "Outbox message exhausted its attempts and was dead-lettered"
        );
    }
}

pub struct OutboxProcessorHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ProcessorState>,
    task: JoinHandle<()>,
}

impl OutboxProcessorHandle {
    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessorState> {
        self.state.clone()
    }

    /// Cancels the loop and waits for the current row, if any, to be recorded.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!(target = SOURCE, error = %err, "Outbox processor task failed");
        }
    }
}
