//! WorkerLoop - ジョブ実行ループ（pick → process → 結果を書き戻す）
//!
//! 1 tick で処理するジョブは最大 1 件。現在のジョブの書き戻し（terminal write
//! または requeue）が終わるまで次の pickup はしない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::{QueueConfig, duration_ms};
use super::status::StatusReporter;
use crate::domain::{JobId, Outcome, OutcomeKind, ProcessError, StoreError};
use crate::ports::{Clock, JobProcessor, SystemClock};
use crate::queue::{Job, JobQueue, RetryDecision, RetryPolicy, Transition};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing eligible.
    Idle,
    Done(JobId),
    Skipped(JobId),

    /// Logical failure reported by the processor.
    Failed(JobId),

    /// Raised error, attempts remain.
    Requeued(JobId),

    /// Raised error on the last allowed attempt.
    Exhausted(JobId),
}

pub struct WorkerLoop {
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn JobProcessor>,
    policy: RetryPolicy,
    poll_interval: Duration,
    reporter: StatusReporter,
    clock: Arc<dyn Clock>,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        config: &QueueConfig,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            queue,
            processor,
            policy: config.retry_policy(),
            poll_interval: config.poll_interval,
            reporter,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one pickup and process the claimed job to completion.
    ///
    /// Store errors are returned; processor errors are absorbed into the
    /// retry path.
    pub async fn tick(&self) -> Result<TickOutcome, StoreError> {
        self.reporter.tick(self.clock.now());

        let Some(job) = self.queue.pick_next(self.policy.max_attempts).await? else {
            return Ok(TickOutcome::Idle);
        };

        let id = job.id;
        let attempts = job.attempts;
        let notification_id = job.notification_id.clone();
        self.reporter.job_started(id, self.clock.now());
        debug!(job_id = %id, ?notification_id, attempts, "job picked");

        let result = self.invoke(job).await;

        let (transition, tick) = match result {
            Ok(outcome) => {
                self.reporter.job_finished(outcome.kind, self.clock.now());
                self.apply_outcome(id, &outcome).await?
            }
            Err(err) => {
                // raised error: 結果表示上は failed（requeue されても）
                self.reporter.job_finished(OutcomeKind::Failed, self.clock.now());
                let message = err.to_string();
                error!(job_id = %id, ?notification_id, attempts, error = %message, "job error");

                match self.policy.after_error(attempts) {
                    RetryDecision::Requeue => {
                        let transition = self.queue.requeue(id, &message).await?;
                        warn!(job_id = %id, attempts, "job requeued");
                        (transition, TickOutcome::Requeued(id))
                    }
                    RetryDecision::Exhausted => {
                        let reason = format!(
                            "max attempts exhausted ({attempts}/{}): {message}",
                            self.policy.max_attempts
                        );
                        let transition = self.queue.mark_failed(id, &reason).await?;
                        error!(job_id = %id, attempts, "job failed after max attempts");
                        (transition, TickOutcome::Exhausted(id))
                    }
                }
            }
        };

        if transition.is_stale() {
            // watchdog が先に回収した等。行はもう別の状態
            warn!(job_id = %id, "job was no longer in_progress; result not recorded");
        }

        Ok(tick)
    }

    async fn apply_outcome(
        &self,
        id: JobId,
        outcome: &Outcome,
    ) -> Result<(Transition, TickOutcome), StoreError> {
        let reason = outcome.reason_or_empty();
        match outcome.kind {
            OutcomeKind::Done => {
                let transition = self.queue.mark_done(id).await?;
                info!(job_id = %id, detail = ?outcome.detail, "job done");
                Ok((transition, TickOutcome::Done(id)))
            }
            OutcomeKind::Skipped => {
                let transition = self.queue.mark_skipped(id, reason).await?;
                info!(job_id = %id, reason, "job skipped");
                Ok((transition, TickOutcome::Skipped(id)))
            }
            OutcomeKind::Failed => {
                // logical failure: not retried
                let transition = self.queue.mark_failed(id, reason).await?;
                error!(job_id = %id, reason, "job failed");
                Ok((transition, TickOutcome::Failed(id)))
            }
        }
    }

    /// Run the processor in its own task so a panic surfaces as an error.
    async fn invoke(&self, job: Job) -> Result<Outcome, ProcessError> {
        let processor = Arc::clone(&self.processor);
        match tokio::spawn(async move { processor.process(&job).await }).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let panic = join_err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                Err(ProcessError::Panicked(message))
            }
            Err(join_err) => Err(ProcessError::other(join_err.to_string())),
        }
    }

    /// Tick every `poll_interval` until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_ms = duration_ms(self.poll_interval),
            max_attempts = self.policy.max_attempts,
            "worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // 待機中だけ shutdown と競合させる。処理中のジョブは最後まで書き戻す
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.tick().await {
                error!(error = %err, "worker tick failed");
            }
        }

        info!("worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::status::{StatusHandle, status_channel};
    use crate::domain::NotificationId;
    use crate::queue::{JobStatus, SqliteQueue, SqliteStore};
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;

    /// Returns a fixed result, or raises, or panics.
    enum Scripted {
        Outcome(Outcome),
        Raise(&'static str),
        Panic,
    }

    #[async_trait]
    impl JobProcessor for Scripted {
        async fn process(&self, _job: &Job) -> Result<Outcome, ProcessError> {
            match self {
                Scripted::Outcome(outcome) => Ok(outcome.clone()),
                Scripted::Raise(msg) => Err(ProcessError::other(*msg)),
                Scripted::Panic => panic!("processor exploded"),
            }
        }
    }

    async fn setup(
        processor: Scripted,
        max_attempts: u32,
    ) -> (WorkerLoop, Arc<SqliteQueue>, StatusHandle, JobId) {
        let store = SqliteStore::in_memory().await.unwrap();
        let queue = Arc::new(SqliteQueue::new(&store));
        let config = QueueConfig {
            max_attempts,
            ..QueueConfig::default()
        };
        let (reporter, handle) = status_channel();
        let worker = WorkerLoop::new(queue.clone(), Arc::new(processor), &config, reporter);

        let result = queue
            .enqueue(&NotificationId::from("evt-1"), &json!({"foo": 1}))
            .await
            .unwrap();
        let crate::queue::EnqueueResult::Enqueued { job_id } = result else {
            panic!("expected enqueue");
        };

        (worker, queue, handle, job_id)
    }

    #[rstest]
    #[case(Outcome::done(), JobStatus::Done, None)]
    #[case(Outcome::skipped("no-op"), JobStatus::Skipped, Some("no-op"))]
    #[case(Outcome::failed("missing projectVersionId"), JobStatus::Failed, Some("missing projectVersionId"))]
    #[tokio::test]
    async fn outcomes_map_to_terminal_states(
        #[case] outcome: Outcome,
        #[case] status: JobStatus,
        #[case] last_error: Option<&str>,
    ) {
        let kind = outcome.kind;
        let (worker, queue, handle, id) = setup(Scripted::Outcome(outcome), 5).await;

        let tick = worker.tick().await.unwrap();
        assert_ne!(tick, TickOutcome::Idle);

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, status);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), last_error);

        let worker_status = handle.current();
        assert_eq!(worker_status.last_job_id, Some(id));
        assert_eq!(worker_status.last_job_result, Some(kind));

        // terminal: nothing left to pick
        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn logical_failure_is_not_retried() {
        let (worker, queue, _handle, id) = setup(Scripted::Outcome(Outcome::failed("bad")), 5).await;

        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Failed(id));
        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(queue.get(id).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn raised_error_is_requeued_until_ceiling() {
        let (worker, queue, handle, id) = setup(Scripted::Raise("connection refused"), 3).await;

        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Requeued(id));
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_error.as_deref(), Some("connection refused"));
        assert_eq!(handle.current().last_job_result, Some(OutcomeKind::Failed));

        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Requeued(id));
        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Exhausted(id));
        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Idle);

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(
            job.last_error.as_deref(),
            Some("max attempts exhausted (3/3): connection refused")
        );
    }

    #[tokio::test]
    async fn panic_is_treated_as_raised_error() {
        let (worker, queue, _handle, id) = setup(Scripted::Panic, 5).await;

        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Requeued(id));
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(
            job.last_error.as_deref(),
            Some("processor panicked: processor exploded")
        );
    }

    #[tokio::test]
    async fn empty_queue_only_records_the_tick() {
        let store = SqliteStore::in_memory().await.unwrap();
        let queue = Arc::new(SqliteQueue::new(&store));
        let (reporter, handle) = status_channel();
        let worker = WorkerLoop::new(
            queue,
            Arc::new(Scripted::Outcome(Outcome::done())),
            &QueueConfig::default(),
            reporter,
        );

        assert_eq!(worker.tick().await.unwrap(), TickOutcome::Idle);
        let status = handle.current();
        assert!(status.last_tick_at.is_some());
        assert!(status.last_job_id.is_none());
    }

    #[tokio::test]
    async fn run_processes_on_ticks_and_stops_on_shutdown() {
        let store = SqliteStore::in_memory().await.unwrap();
        let queue = Arc::new(SqliteQueue::new(&store));
        let config = QueueConfig {
            poll_interval: Duration::from_millis(10),
            ..QueueConfig::default()
        };
        let (reporter, _handle) = status_channel();
        let worker = WorkerLoop::new(
            queue.clone(),
            Arc::new(Scripted::Outcome(Outcome::done())),
            &config,
            reporter,
        );
        let result = queue
            .enqueue(&NotificationId::from("evt-run"), &json!({}))
            .await
            .unwrap();
        let crate::queue::EnqueueResult::Enqueued { job_id } = result else {
            panic!("expected enqueue");
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(worker.run(shutdown_rx));

        let mut status = JobStatus::Pending;
        for _ in 0..200 {
            status = queue.get(job_id).await.unwrap().unwrap().status;
            if status == JobStatus::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Done);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
