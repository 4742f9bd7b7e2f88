use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::config::QueueConfig;
use super::status::{StatusHandle, status_channel};
use super::watchdog_loop::WatchdogLoop;
use super::worker_loop::WorkerLoop;
use crate::ports::JobProcessor;
use crate::queue::JobQueue;

/// Running worker + watchdog pair.
/// - 2 つのループは `JobQueue` 以外何も共有しない
/// - `shutdown_and_join()` で両方の終了を待てる
pub struct QueueRuntime {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    status: StatusHandle,
}

impl QueueRuntime {
    /// Spawn the worker loop and the watchdog loop.
    pub fn spawn(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        config: &QueueConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (reporter, status) = status_channel();

        let worker = WorkerLoop::new(Arc::clone(&queue), processor, config, reporter);
        let watchdog = WatchdogLoop::new(queue, config);

        let joins = vec![
            tokio::spawn(worker.run(shutdown_rx.clone())),
            tokio::spawn(watchdog.run(shutdown_rx)),
        ];

        Self {
            shutdown_tx,
            joins,
            status,
        }
    }

    /// Reader for the worker's last-tick bookkeeping.
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Stop taking new jobs.
    /// This does not cancel an in-flight job; its result is still written back.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for both loops.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "queue task ended abnormally");
            }
        }
    }
}
