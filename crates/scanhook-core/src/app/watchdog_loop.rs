//! WatchdogLoop - in_progress のまま止まったジョブの回収
//!
//! WorkerLoop とは独立したタイマーで動き、ストア経由でしかやり取りしない。
//! payload も見ないし processor も呼ばない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::{QueueConfig, duration_ms};
use crate::domain::StoreError;
use crate::queue::JobQueue;

/// Rows touched by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `in_progress -> pending`.
    pub reclaimed: u64,

    /// `pending -> failed` (attempt budget already spent).
    pub exhausted: u64,
}

pub struct WatchdogLoop {
    queue: Arc<dyn JobQueue>,
    stuck_threshold: Duration,
    max_attempts: u32,
    interval: Duration,
}

impl WatchdogLoop {
    pub fn new(queue: Arc<dyn JobQueue>, config: &QueueConfig) -> Self {
        Self {
            queue,
            stuck_threshold: config.stuck_threshold,
            max_attempts: config.max_attempts,
            interval: config.watchdog_interval,
        }
    }

    /// Reclaim stuck jobs, then fail the ones left at the attempt ceiling.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let reclaimed = self.queue.sweep_stuck(self.stuck_threshold).await?;
        if reclaimed > 0 {
            warn!(count = reclaimed, "watchdog requeued stuck jobs");
        }

        let exhausted = self.queue.fail_exhausted(self.max_attempts).await?;
        if exhausted > 0 {
            warn!(count = exhausted, "watchdog failed jobs with exhausted attempts");
        }

        debug!(reclaimed, exhausted, "watchdog sweep finished");
        Ok(SweepReport {
            reclaimed,
            exhausted,
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            stuck_ms = duration_ms(self.stuck_threshold),
            check_ms = duration_ms(self.interval),
            "watchdog started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.sweep().await {
                error!(error = %err, "watchdog sweep failed");
            }
        }

        info!("watchdog stopped");
    }
}
