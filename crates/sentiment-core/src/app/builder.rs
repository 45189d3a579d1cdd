//! WorkerBuilder - 設定から worker を組み立てる
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 設定が不正なら consumer を 1 つも登録しない
//! - annotator / decider は差し替え可能（テストではスクリプト化した fake を注入）

use std::sync::Arc;

use thiserror::Error;

use crate::app::worker::AnalyserWorker;
use crate::app::worker_group::{Deployment, StartError, WorkerGroup};
use crate::config::{AnalyserConfig, ConfigError};
use crate::domain::{Decider, DefaultDecider};
use crate::impls::{HttpAnnotator, HttpAnnotatorError};
use crate::observability::WorkerStats;
use crate::ports::{Annotator, Discovery, MessageBus};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Annotator(#[from] HttpAnnotatorError),

    #[error("failed to start worker group: {0}")]
    Start(#[from] StartError),
}

/// # 使用例
/// ```ignore
/// let group = WorkerBuilder::new(config)
///     .deploy(bus, discovery)
///     .await?;
/// ```
pub struct WorkerBuilder {
    config: AnalyserConfig,
    annotator: Option<Arc<dyn Annotator>>,
    decider: Option<Arc<dyn Decider>>,
    stats: Option<Arc<WorkerStats>>,
}

impl WorkerBuilder {
    pub fn new(config: AnalyserConfig) -> Self {
        Self {
            config,
            annotator: None,
            decider: None,
            stats: None,
        }
    }

    /// Replace the HTTP annotator.
    pub fn annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Replace the [`DefaultDecider`].
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn build(self) -> Result<AnalyserWorker, BuildError> {
        self.config.validate()?;

        let annotator: Arc<dyn Annotator> = match self.annotator {
            Some(annotator) => annotator,
            None => Arc::new(HttpAnnotator::new(&self.config)?),
        };
        let decider: Arc<dyn Decider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(DefaultDecider::new(self.config.round_trip_estimate())),
        };

        let worker = AnalyserWorker::new(annotator, decider, self.config.language.clone());
        Ok(match self.stats {
            Some(stats) => worker.with_stats(stats),
            None => worker,
        })
    }

    /// Build, then start `instances` slots at the configured address.
    pub async fn deploy(
        self,
        bus: Arc<dyn MessageBus>,
        discovery: Arc<dyn Discovery>,
    ) -> Result<WorkerGroup, BuildError> {
        let deployment = Deployment::from_config(&self.config);
        let worker = Arc::new(self.build()?);
        Ok(WorkerGroup::start(worker, bus, discovery, deployment).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::app::client::AnalyserClient;
    use crate::app::worker::testing::{ScriptedAnnotator, score};
    use crate::domain::JobState;
    use crate::impls::{InMemoryBus, InMemoryDiscovery};

    fn config() -> AnalyserConfig {
        AnalyserConfig {
            api_key: "k".into(),
            base_url: "westus.api.cognitive.microsoft.com".into(),
            instances: 2,
            ..AnalyserConfig::default()
        }
    }

    #[test]
    fn invalid_config_fails_fast() {
        let result = WorkerBuilder::new(AnalyserConfig::default()).build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[test]
    fn valid_config_builds_http_worker() {
        assert!(WorkerBuilder::new(config()).build().is_ok());
    }

    #[test]
    fn unusable_endpoint_fails_fast() {
        let mut config = config();
        config.base_url = "http://exa mple.org".into();
        assert!(matches!(
            WorkerBuilder::new(config).build(),
            Err(BuildError::Annotator(_))
        ));
    }

    #[tokio::test]
    async fn invalid_config_registers_nothing() {
        let bus = InMemoryBus::new();
        let discovery = Arc::new(InMemoryDiscovery::new(Arc::new(bus.clone())));

        let mut config = config();
        config.instances = 0;
        let result = WorkerBuilder::new(config)
            .deploy(Arc::new(bus.clone()), discovery.clone())
            .await;

        assert!(result.is_err());
        assert_eq!(bus.consumer_count("sentiment.analyser.worker"), 0);
        assert!(discovery.records().await.is_empty());
    }

    #[tokio::test]
    async fn deploy_serves_jobs_with_injected_annotator() {
        let bus = InMemoryBus::new();
        let discovery = Arc::new(InMemoryDiscovery::new(Arc::new(bus.clone())));
        let stats = Arc::new(WorkerStats::new());

        let group = WorkerBuilder::new(config())
            .annotator(Arc::new(ScriptedAnnotator::always(score(0.3))))
            .stats(stats.clone())
            .deploy(Arc::new(bus.clone()), discovery.clone())
            .await
            .unwrap();
        assert_eq!(bus.consumer_count("sentiment.analyser.worker"), 2);

        let client = AnalyserClient::discover(Arc::new(bus), discovery.as_ref(), "news-analyser")
            .await
            .unwrap();
        let job = client
            .analyse(json!({ "url": "https://news/1", "name": "N", "description": "D" }))
            .await
            .unwrap();

        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(stats.snapshot().completed, 1);
        group.stop().await.unwrap();
    }
}
