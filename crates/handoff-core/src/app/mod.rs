//! App - アプリケーション層
//!
//! ports を組み合わせて、ハンドオフのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: Config からのワイヤリング
//! - **Dispatcher**: エージェントへの通知（リトライ・ワーカープール）
//! - **Reclaimer**: 取りこぼしたレコードの定期回収
//! - **StatusProjector**: 購読者ごとのステータスストリーム
//! - **RecordService**: upload / get / watch / cancel / history の窓口

pub mod builder;
pub mod dispatcher;
pub mod projector;
pub mod reclaimer;
pub mod retry;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::dispatcher::{DispatchOutcome, Dispatcher};
pub use self::projector::{StatusProjector, StatusSubscription};
pub use self::reclaimer::{Reclaimer, ReclaimerHandle, TickReport};
pub use self::retry::RetryPolicy;
pub use self::service::{History, NewRecording, RecordService};
