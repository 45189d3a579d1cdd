//! sentiment-core
//!
//! Job execution core for the news sentiment analyser: a retryable,
//! timeout-bounded job model and the worker that consumes jobs from a
//! location-transparent bus, calls the annotation service and replies once.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, budget, state, retry, errors, job, article, outcome, decision）
//! - **ports**: 抽象化レイヤー（Annotator, MessageBus, Discovery, ArticleStore）
//! - **impls**: 実装（HttpAnnotator, InMemoryBus, InMemoryDiscovery, InMemoryStore）
//! - **app**: アプリケーション層（worker, worker_group, client, builder, pipeline）
//! - **config**: AnalyserConfig
//! - **observability**: worker のカウンタ

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{AnalyserClient, AnalyserWorker, WorkerBuilder, WorkerGroup};
pub use config::AnalyserConfig;
pub use domain::{Job, JobFailure, JobState, RetryStrategy, Timeout};
