//! Status - ワーカーの最終 tick / 最終ジョブ情報
//!
//! 書き手は WorkerLoop だけ（StatusReporter）、読み手は何人いてもよい
//! （StatusHandle、/metrics など）。watch channel の上に載せている。

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::domain::{JobId, OutcomeKind};

/// Last-tick bookkeeping of the worker loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_job_id: Option<JobId>,
    pub last_job_started_at: Option<DateTime<Utc>>,
    pub last_job_finished_at: Option<DateTime<Utc>>,

    /// `None` while a job is running. A raised error reports `Failed`
    /// even when the job was requeued.
    pub last_job_result: Option<OutcomeKind>,
}

/// Create a connected reporter/handle pair.
pub fn status_channel() -> (StatusReporter, StatusHandle) {
    let (tx, rx) = watch::channel(WorkerStatus::default());
    (StatusReporter { tx }, StatusHandle { rx })
}

/// Single writer side. Not `Clone`.
#[derive(Debug)]
pub struct StatusReporter {
    tx: watch::Sender<WorkerStatus>,
}

impl StatusReporter {
    pub fn tick(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|s| s.last_tick_at = Some(at));
    }

    pub fn job_started(&self, id: JobId, at: DateTime<Utc>) {
        self.tx.send_modify(|s| {
            s.last_job_id = Some(id);
            s.last_job_started_at = Some(at);
            s.last_job_result = None;
        });
    }

    pub fn job_finished(&self, result: OutcomeKind, at: DateTime<Utc>) {
        self.tx.send_modify(|s| {
            s.last_job_finished_at = Some(at);
            s.last_job_result = Some(result);
        });
    }

    /// Another reader for the same channel.
    pub fn handle(&self) -> StatusHandle {
        StatusHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<WorkerStatus>,
}

impl StatusHandle {
    pub fn current(&self) -> WorkerStatus {
        self.rx.borrow().clone()
    }
}
