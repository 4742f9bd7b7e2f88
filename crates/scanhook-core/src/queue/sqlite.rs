//! SqliteQueue - JobQueue の SQLite 実装
//!
//! # 排他的 pickup
//! pick-and-lock は `UPDATE ... WHERE id = (SELECT ...) AND status = 'pending'
//! RETURNING ...` の 1 文で行う。書き込み文なので開始時に write lock を取り、
//! 2 つの呼び出しが同じ行を同時に claim することはない。
//! 外部呼び出しの前に commit 済みなので、遅い I/O の間 lock は保持しない。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use super::record::{JOB_COLUMNS, format_ts};
use super::{
    EnqueueResult, InProgressSummary, Job, JobQueue, JobStatus, PendingSummary, QueueSnapshot,
    SqliteStore, StatusCounts, Transition,
};
use crate::domain::{JobId, NotificationId, StoreError};
use crate::ports::{Clock, SystemClock};

/// `last_error` written by the watchdog on reclaim.
pub const RECLAIM_MESSAGE: &str = "reclaimed by watchdog (stuck in_progress)";

pub struct SqliteQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteQueue {
    pub fn new(store: &SqliteStore) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: &SqliteStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: store.pool().clone(),
            clock,
        }
    }

    fn now(&self) -> String {
        format_ts(self.clock.now())
    }

    async fn fetch_oldest(&self, status: JobStatus, order_by: &str) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY {order_by} ASC, id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database("snapshot.oldest"))?;

        row.as_ref().map(Job::from_row).transpose()
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn enqueue(
        &self,
        notification_id: &NotificationId,
        payload: &serde_json::Value,
    ) -> Result<EnqueueResult, StoreError> {
        let payload_json = serde_json::to_string(payload)?;
        let now = self.now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::database("enqueue.begin"))?;

        let gate = sqlx::query("INSERT INTO idempotency (notification_id, created_at) VALUES (?1, ?2)")
            .bind(notification_id.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await;

        match gate {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // 重複配送: job は作らない
                tx.rollback()
                    .await
                    .map_err(StoreError::database("enqueue.rollback"))?;
                return Ok(EnqueueResult::Duplicate);
            }
            Err(source) => {
                return Err(StoreError::Database {
                    operation: "enqueue.idempotency",
                    source,
                });
            }
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (notification_id, payload_json, status, attempts, created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4)
            "#,
        )
        .bind(notification_id.as_str())
        .bind(&payload_json)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::database("enqueue.job"))?;

        tx.commit()
            .await
            .map_err(StoreError::database("enqueue.commit"))?;

        Ok(EnqueueResult::Enqueued {
            job_id: JobId::new(inserted.last_insert_rowid()),
        })
    }

    async fn pick_next(&self, max_attempts: u32) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
               SET status = 'in_progress', attempts = attempts + 1, updated_at = ?1
             WHERE id = (
                       SELECT id FROM jobs
                        WHERE status = 'pending' AND attempts < ?2
                        ORDER BY created_at ASC, id ASC
                        LIMIT 1
                   )
               AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(self.now())
            .bind(i64::from(max_attempts))
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database("pick_next"))?;

        row.as_ref().map(Job::from_row).transpose()
    }

    async fn mark_done(&self, id: JobId) -> Result<Transition, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'done', updated_at = ?1 WHERE id = ?2 AND status = 'in_progress'",
        )
        .bind(self.now())
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database("mark_done"))?;

        Ok(Transition::from_rows(result.rows_affected()))
    }

    async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<Transition, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'skipped', last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'in_progress'
            "#,
        )
        .bind(reason)
        .bind(self.now())
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database("mark_skipped"))?;

        Ok(Transition::from_rows(result.rows_affected()))
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<Transition, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'failed', last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(reason)
        .bind(self.now())
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database("mark_failed"))?;

        Ok(Transition::from_rows(result.rows_affected()))
    }

    async fn requeue(&self, id: JobId, reason: &str) -> Result<Transition, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'pending', last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'in_progress'
            "#,
        )
        .bind(reason)
        .bind(self.now())
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database("requeue"))?;

        Ok(Transition::from_rows(result.rows_affected()))
    }

    async fn sweep_stuck(&self, threshold: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let Some(cutoff) = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            // threshold reaches before the representable range; nothing can be that old
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'pending', last_error = ?1, updated_at = ?2
             WHERE status = 'in_progress' AND updated_at < ?3
            "#,
        )
        .bind(RECLAIM_MESSAGE)
        .bind(format_ts(now))
        .bind(format_ts(cutoff))
        .execute(&self.pool)
        .await
        .map_err(StoreError::database("sweep_stuck"))?;

        Ok(result.rows_affected())
    }

    async fn fail_exhausted(&self, max_attempts: u32) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
               SET status = 'failed',
                   last_error = 'max attempts exhausted (' || attempts || '/' || ?2 || ')'
                       || CASE WHEN last_error IS NULL OR last_error = '' THEN ''
                               ELSE ': ' || last_error END,
                   updated_at = ?1
             WHERE status = 'pending' AND attempts >= ?2
            "#,
        )
        .bind(self.now())
        .bind(i64::from(max_attempts))
        .execute(&self.pool)
        .await
        .map_err(StoreError::database("fail_exhausted"))?;

        Ok(result.rows_affected())
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
              COALESCE(SUM(CASE WHEN status = 'pending'     THEN 1 ELSE 0 END), 0) AS pending,
              COALESCE(SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END), 0) AS in_progress,
              COALESCE(SUM(CASE WHEN status = 'done'        THEN 1 ELSE 0 END), 0) AS done,
              COALESCE(SUM(CASE WHEN status = 'failed'      THEN 1 ELSE 0 END), 0) AS failed,
              COALESCE(SUM(CASE WHEN status = 'skipped'     THEN 1 ELSE 0 END), 0) AS skipped,
              COUNT(*) AS total
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::database("snapshot.counts"))?;

        let count = |column: &'static str| -> Result<u64, StoreError> {
            let value: i64 = sqlx::Row::try_get(&row, column)
                .map_err(StoreError::database("snapshot.counts"))?;
            u64::try_from(value).map_err(|_| StoreError::Corrupt {
                column,
                message: format!("negative count: {value}"),
            })
        };

        let counts = StatusCounts {
            pending: count("pending")?,
            in_progress: count("in_progress")?,
            done: count("done")?,
            failed: count("failed")?,
            skipped: count("skipped")?,
        };
        let total = count("total")?;

        let oldest_pending = self
            .fetch_oldest(JobStatus::Pending, "created_at")
            .await?
            .map(|job| PendingSummary {
                id: job.id,
                notification_id: job.notification_id,
                created_at: job.created_at,
                attempts: job.attempts,
            });

        let oldest_in_progress = self
            .fetch_oldest(JobStatus::InProgress, "updated_at")
            .await?
            .map(|job| InProgressSummary {
                id: job.id,
                notification_id: job.notification_id,
                updated_at: job.updated_at,
                attempts: job.attempts,
                last_error: job.last_error,
            });

        Ok(QueueSnapshot {
            counts,
            total,
            oldest_pending,
            oldest_in_progress,
        })
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database("get"))?;

        row.as_ref().map(Job::from_row).transpose()
    }
}
