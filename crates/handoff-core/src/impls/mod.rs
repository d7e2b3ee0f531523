//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発・テスト用の正本（AgentProgressSink も実装）
//! - **InMemoryBlobStore**: 開発用の Blob ストア
//! - **HttpAgentTransport**: reqwest による本番用のエージェント送信
//!
//! # 本番用ストア
//! SQL / オブジェクトストレージの実装は別クレートに置く想定です。
//! TaskStore の条件付き更新は `UPDATE ... WHERE id = ? AND status = ?` 1 文で表現できます。

pub mod http_agent;
pub mod inmem_blob;
pub mod inmem_store;

pub use self::http_agent::HttpAgentTransport;
pub use self::inmem_blob::InMemoryBlobStore;
pub use self::inmem_store::InMemoryTaskStore;
