//! Store port - 解析済み記事の保存先（document store）
//!
//! job/worker のコアからは呼ばれない。オーケストレーション（pipeline）が使う。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("collection `{0}` already exists")]
    CollectionExists(String),

    #[error("invalid collection name `{0}`")]
    InvalidName(String),

    #[error("no articles to save")]
    EmptyBatch,

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Acknowledgement of a batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReport {
    pub ok: u8,
    pub n: usize,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn collections(&self) -> Result<Vec<String>, StoreError>;

    /// `false` for an empty name.
    async fn has_collection(&self, name: &str) -> Result<bool, StoreError>;

    /// Fails when the collection already exists.
    async fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn is_index_present(&self, index: &str, collection: &str) -> Result<bool, StoreError>;

    /// Create `{collection}Index` over `keys`, creating the collection if missing.
    /// Returns the index name.
    async fn create_index(&self, collection: &str, keys: &[&str]) -> Result<String, StoreError>;

    /// Fails on an empty batch.
    async fn save_articles(
        &self,
        collection: &str,
        articles: Vec<serde_json::Value>,
    ) -> Result<SaveReport, StoreError>;

    /// Saved articles carrying a sentiment annotation. Empty when the
    /// collection is missing.
    async fn sentiment_results(&self, collection: &str) -> Result<Vec<serde_json::Value>, StoreError>;
}

/// Index name for a collection.
pub fn index_name(collection: &str) -> String {
    format!("{collection}Index")
}
