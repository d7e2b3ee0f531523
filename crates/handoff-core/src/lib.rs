//! handoff-core
//!
//! Core of the recording hand-off: a record state machine, a retried dispatcher
//! to the external analysis agent, a stale-record reclaimer and a per-subscriber
//! status projector.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, record, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, AgentTransport, BlobStore, Clock, など）
//! - **impls**: 実装（InMemoryTaskStore, InMemoryBlobStore, HttpAgentTransport）
//! - **app**: アプリケーションロジック（builder, dispatcher, reclaimer, projector, service）
//! - **config**: TOML 設定
//! - **observability**: 状態別の件数

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
