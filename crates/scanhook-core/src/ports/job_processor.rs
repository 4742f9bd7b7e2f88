//! JobProcessor port - ジョブ処理本体の抽象化
//!
//! The queue treats the processor as a black box that either classifies the
//! job (`Outcome`) or raises an error. Raised errors go through the retry
//! policy; outcomes never do.

use async_trait::async_trait;

use crate::domain::{Outcome, ProcessError};
use crate::queue::Job;

#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Process one claimed job.
    ///
    /// `job.attempts` already counts the current attempt.
    async fn process(&self, job: &Job) -> Result<Outcome, ProcessError>;
}
