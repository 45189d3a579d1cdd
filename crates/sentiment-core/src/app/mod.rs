//! App - アプリケーション層
//!
//! ports を組み合わせて worker の処理とオーケストレーションを実装する。
//!
//! # 主要コンポーネント
//! - **AnalyserWorker**: 1 リクエストの処理（validate → attempt → decide → reply）
//! - **WorkerGroup**: 1 アドレスに N slot、health の publish / 停止
//! - **AnalyserClient**: bus 越しの型付きクライアント
//! - **WorkerBuilder**: 設定からの構築（Fail-fast）
//! - **AnalysisPipeline**: 解析 → 保存

pub mod builder;
pub mod client;
pub mod pipeline;
pub mod worker;
pub mod worker_group;

pub use self::builder::{BuildError, WorkerBuilder};
pub use self::client::{AnalyserClient, ClientError};
pub use self::pipeline::{AnalysisPipeline, FailedArticle, FailureOrigin, PipelineError, PipelineReport};
pub use self::worker::AnalyserWorker;
pub use self::worker_group::{Deployment, StartError, StopError, WorkerGroup};
