//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpAnnotator**: reqwest による外部 API 呼び出し（本番用）
//! - **InMemoryBus**: プロセス内 request/reply バス
//! - **InMemoryDiscovery**: health record をバスに announce する discovery
//! - **InMemoryStore**: 開発用・テスト用の document store

pub mod http_annotator;
pub mod inmem_bus;
pub mod inmem_discovery;
pub mod inmem_store;

pub use self::http_annotator::{HttpAnnotator, HttpAnnotatorError};
pub use self::inmem_bus::InMemoryBus;
pub use self::inmem_discovery::InMemoryDiscovery;
pub use self::inmem_store::InMemoryStore;
