//! AnalysisPipeline - オーケストレーション（記事を解析して保存する）
//!
//! 1. collection と index を用意
//! 2. 記事ごとに Job を作って並行に submit（JoinSet）。同時に投げるのは
//!    `max_in_flight` 件まで（worker の instance 数に合わせる）
//! 3. 成功した結果だけをまとめて保存し、失敗は report に残す（自動再投入はしない）
//!
//! # 学習ポイント
//! - client の待ち時間は「送った瞬間」から数える。job の timeout は worker が
//!   activate してから。bus のキューで待つ時間を client に食わせないために、
//!   送る前に Semaphore の permit を取る
//! - 返信が来なかった（client 側 timeout）ことは worker の失敗とは別に報告する。
//!   その job は worker 側で完了しているかもしれない

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::app::client::{AnalyserClient, ClientError};
use crate::domain::codes;
use crate::ports::{ArticleStore, BusError, StoreError, index_name};

/// Keys of the per-collection article index.
pub const INDEX_KEYS: &[&str] = &["name", "datePublished", "description"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Where a per-article failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureOrigin {
    /// The worker answered with a structured failure.
    Worker,
    /// The client stopped waiting for a reply. The job may still have run.
    NoReply,
    /// The request was not delivered, or the reply could not be read.
    Transport,
    /// The submission task died.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedArticle {
    /// Position in the submitted batch.
    pub index: usize,
    pub origin: FailureOrigin,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub submitted: usize,
    pub completed: usize,
    pub failed: Vec<FailedArticle>,
    pub saved: usize,
}

pub struct AnalysisPipeline {
    client: AnalyserClient,
    store: Arc<dyn ArticleStore>,
    max_in_flight: usize,
}

impl AnalysisPipeline {
    pub fn new(client: AnalyserClient, store: Arc<dyn ArticleStore>) -> Self {
        Self {
            client,
            store,
            max_in_flight: 1,
        }
    }

    /// How many jobs may wait for a reply at once. Match it to the worker
    /// instance count so no request sits in the bus queue on the client's clock.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub async fn run(
        &self,
        collection: &str,
        articles: Vec<serde_json::Value>,
    ) -> Result<PipelineReport, PipelineError> {
        self.prepare(collection).await?;

        let mut report = PipelineReport {
            submitted: articles.len(),
            ..PipelineReport::default()
        };

        let gate = Arc::new(Semaphore::new(self.max_in_flight));
        let mut pending = JoinSet::new();
        let mut positions = HashMap::new();
        for (index, article) in articles.into_iter().enumerate() {
            let client = self.client.clone();
            let gate = Arc::clone(&gate);
            let handle = pending.spawn(async move {
                // The gate is never closed; acquiring only waits for a free slot.
                let _permit = gate.acquire_owned().await;
                client.analyse(article).await
            });
            positions.insert(handle.id(), index);
        }

        let mut annotated = Vec::new();
        while let Some(joined) = pending.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result.map_err(|e| failure_of(&e))),
                Err(e) => {
                    warn!(error = %e, "submission task aborted");
                    let failure = (
                        FailureOrigin::Aborted,
                        codes::INTERNAL_FAULT,
                        format!("submission task aborted: {e}"),
                    );
                    (e.id(), Err(failure))
                }
            };
            // Every spawned task id was recorded above.
            let Some(index) = positions.remove(&id) else {
                continue;
            };
            match result {
                Ok(job) => match job.result() {
                    Some(result) => annotated.push((index, result.clone())),
                    None => report.failed.push(FailedArticle {
                        index,
                        origin: FailureOrigin::Worker,
                        code: codes::INTERNAL_FAULT,
                        message: "completed job without result".into(),
                    }),
                },
                Err((origin, code, message)) => {
                    warn!(index, ?origin, code, error = %message, "article analysis failed");
                    report.failed.push(FailedArticle {
                        index,
                        origin,
                        code,
                        message,
                    });
                }
            }
        }

        annotated.sort_by_key(|(index, _)| *index);
        report.failed.sort_by_key(|f| f.index);
        report.completed = annotated.len();

        if !annotated.is_empty() {
            let documents = annotated.into_iter().map(|(_, doc)| doc).collect();
            report.saved = self.store.save_articles(collection, documents).await?.n;
        }

        info!(
            collection,
            submitted = report.submitted,
            completed = report.completed,
            failed = report.failed.len(),
            saved = report.saved,
            "pipeline finished"
        );
        Ok(report)
    }

    async fn prepare(&self, collection: &str) -> Result<(), PipelineError> {
        if !self.store.has_collection(collection).await? {
            match self.store.create_collection(collection).await {
                Ok(()) | Err(StoreError::CollectionExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !self
            .store
            .is_index_present(&index_name(collection), collection)
            .await?
        {
            self.store.create_index(collection, INDEX_KEYS).await?;
        }
        Ok(())
    }
}

fn failure_of(error: &ClientError) -> (FailureOrigin, i32, String) {
    match error {
        ClientError::Rejected(failure) => (
            FailureOrigin::Worker,
            failure.code(),
            failure.message().to_string(),
        ),
        ClientError::Bus(BusError::Timeout { .. }) => {
            (FailureOrigin::NoReply, codes::TIMEOUT, error.to_string())
        }
        other => (FailureOrigin::Transport, codes::EXTERNAL_FAILURE, other.to_string()),
    }
}
