//! scanhook-core
//!
//! Durable, at-least-once job queue for inbound scan notifications.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, outcome, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, JobProcessor）
//! - **queue**: ジョブリポジトリ（JobQueue trait + SQLite 実装、状態、retry）
//! - **app**: 実行系（intake, worker_loop, watchdog_loop, runtime, status）

pub mod app;
pub mod domain;
pub mod ports;
pub mod queue;
