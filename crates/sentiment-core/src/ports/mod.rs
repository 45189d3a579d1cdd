//! Ports - 抽象化レイヤー
//!
//! 外部システム（アノテーション API, メッセージバス, discovery, document store）
//! への境界を trait として定義する。実装は impls 側。

pub mod annotator;
pub mod bus;
pub mod discovery;
pub mod store;

pub use self::annotator::Annotator;
pub use self::bus::{BusError, Consumer, Delivery, Failure, MessageBus, Reply};
pub use self::discovery::{ANNOUNCE_TOPIC, Discovery, DiscoveryError, ServiceRecord, ServiceStatus};
pub use self::store::{ArticleStore, SaveReport, StoreError, index_name};
