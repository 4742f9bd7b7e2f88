//! IdGenerator port - notification ID 生成の抽象化
//!
//! 送信側が request-history id を付けてこなかった通知には、
//! 衝突しない合成 ID を割り当てる。合成 ID は重複排除の対象にならない
//! （毎回新しい値なので、同じ内容の再送は別ジョブになる）。

use ulid::Ulid;

use crate::domain::NotificationId;
use crate::ports::Clock;

/// Prefix of synthesized notification ids.
pub const SYNTHETIC_PREFIX: &str = "nohist-";

/// IdGenerator は合成 notification ID を生成
pub trait IdGenerator: Send + Sync {
    fn notification_id(&self) -> NotificationId;
}

/// ULID ベースの生成器
///
/// Clock を使って timestamp 部分を決めるので、FixedClock と組み合わせると
/// timestamp 部分が決定的になる（ランダム部分は毎回異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn notification_id(&self) -> NotificationId {
        NotificationId::new(format!("{SYNTHETIC_PREFIX}{}", self.next_ulid()))
    }
}
