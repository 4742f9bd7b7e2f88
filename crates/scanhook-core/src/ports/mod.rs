//! Ports - 抽象化レイヤー
//!
//! 外部との境界を trait で切る。
//! - **Clock**: 現在時刻（テストでは FixedClock）
//! - **IdGenerator**: 合成 notification ID
//! - **JobProcessor**: ジョブ処理本体（スキャン結果 → 欠陥起票など）

pub mod clock;
pub mod id_generator;
pub mod job_processor;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, SYNTHETIC_PREFIX, UlidGenerator};
pub use self::job_processor::JobProcessor;
