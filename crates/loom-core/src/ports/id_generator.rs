//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）。Clock を注入できるので、
//!   FixedClock と組み合わせると timestamp 部分が決定的になる。

use crate::domain::ids::{JoinId, RequestId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数ワーカーから共有される）
pub trait IdGenerator: Send + Sync {
    /// Request ID を生成
    fn generate_request_id(&self) -> RequestId;

    /// Join ID を生成（fork ごとに 1 つ）
    fn generate_join_id(&self) -> JoinId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_request_id(&self) -> RequestId {
        RequestId::from(self.next_ulid())
    }

    fn generate_join_id(&self) -> JoinId {
        JoinId::new(self.next_ulid(), self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_request_id();
        let id2 = id_gen.generate_request_id();
        assert_ne!(id1, id2);

        let j1 = id_gen.generate_join_id();
        let j2 = id_gen.generate_join_id();
        assert_ne!(j1, j2);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_is_deterministic() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_request_id();
        let id2 = id_gen.generate_request_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        // timestamp 部分は同じ
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);

        let join = id_gen.generate_join_id();
        assert_eq!(join.timestamp, fixed_time);
    }
}
