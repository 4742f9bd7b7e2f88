//! App - アプリケーション層
//!
//! ports と queue を組み合わせてキューの実行系を組み立てる。
//!
//! # 主要コンポーネント
//! - **NotificationIntake**: 通知 → enqueue（ID 補完と重複排除）
//! - **WorkerLoop**: ジョブ実行ループ（pick → process → 書き戻し）
//! - **WatchdogLoop**: stuck ジョブの回収
//! - **QueueRuntime**: 2 つのループの起動と停止
//! - **WorkerStatus**: 最終 tick 情報（/metrics 用）

pub mod config;
pub mod intake;
pub mod runtime;
pub mod status;
pub mod watchdog_loop;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::config::{QueueConfig, duration_ms};
pub use self::intake::NotificationIntake;
pub use self::runtime::QueueRuntime;
pub use self::status::{StatusHandle, StatusReporter, WorkerStatus, status_channel};
pub use self::watchdog_loop::{SweepReport, WatchdogLoop};
pub use self::worker_loop::{TickOutcome, WorkerLoop};
