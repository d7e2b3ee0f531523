//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（DB, Blob storage, AI エージェント）への
//! インターフェースで、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - AgentTransport は 1 回の送信だけを表す（リトライは app 層）
//! - エージェントの進捗書き込みはコアの外。AgentProgressSink で抽象化

pub mod agent;
pub mod blob_store;
pub mod clock;
pub mod id_generator;
pub mod progress;
pub mod task_store;

pub use self::agent::{AgentError, AgentRequest, AgentTransport};
pub use self::blob_store::BlobStore;
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::progress::AgentProgressSink;
pub use self::task_store::{DispatchOrigin, FailureDisposition, Page, TaskStore};
