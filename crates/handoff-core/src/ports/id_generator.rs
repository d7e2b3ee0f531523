//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{OwnerId, RecordId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（アップロードは並行に走る）
pub trait IdGenerator: Send + Sync {
    /// Record ID を生成
    fn generate_record_id(&self) -> RecordId;

    /// Owner ID を生成（デモ・テスト用。本番の owner は認証側が発行する）
    fn generate_owner_id(&self) -> OwnerId;

    /// 任意の用途のための生の ULID（blob key など）
    fn generate_ulid(&self) -> Ulid;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// テストで ManualClock を渡せば timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_record_id(&self) -> RecordId {
        RecordId::from(self.generate_ulid())
    }

    fn generate_owner_id(&self) -> OwnerId {
        OwnerId::from(self.generate_ulid())
    }

    fn generate_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}
