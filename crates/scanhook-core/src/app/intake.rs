//! NotificationIntake - 受信した通知をキューに積む入口

use std::sync::Arc;

use tracing::info;

use crate::domain::{NotificationId, StoreError};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::queue::{EnqueueResult, JobQueue};

/// Resolves the notification id and enqueues the payload.
#[derive(Clone)]
pub struct NotificationIntake {
    queue: Arc<dyn JobQueue>,
    ids: Arc<dyn IdGenerator>,
}

impl NotificationIntake {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self::with_id_generator(queue, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(queue: Arc<dyn JobQueue>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { queue, ids }
    }

    /// Enqueue one notification.
    ///
    /// A missing or blank id gets a synthesized one, so such deliveries are
    /// never treated as duplicates of each other.
    pub async fn accept(
        &self,
        notification_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<EnqueueResult, StoreError> {
        let notification_id = match notification_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => NotificationId::from(id),
            None => self.ids.notification_id(),
        };

        let result = self.queue.enqueue(&notification_id, payload).await?;
        match result {
            EnqueueResult::Enqueued { job_id } => {
                info!(%notification_id, %job_id, "notification enqueued");
            }
            EnqueueResult::Duplicate => {
                info!(%notification_id, "duplicate notification ignored");
            }
        }

        Ok(result)
    }
}
