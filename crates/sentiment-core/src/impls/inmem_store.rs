//! InMemoryStore - document store for development and tests.
//!
//! Collections hold JSON documents; an index is recorded by name only.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::SENTIMENT_FIELD;
use crate::ports::{ArticleStore, SaveReport, StoreError, index_name};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<serde_json::Value>,
    /// index name -> indexed keys
    indexes: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<Mutex<BTreeMap<String, Collection>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Collection>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ArticleStore for InMemoryStore {
    async fn collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        if name.trim().is_empty() {
            return Ok(false);
        }
        Ok(self.lock().contains_key(name))
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        check_name(name)?;
        let mut collections = self.lock();
        if collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), Collection::default());
        debug!(collection = name, "collection created");
        Ok(())
    }

    async fn is_index_present(&self, index: &str, collection: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .get(collection)
            .is_some_and(|c| c.indexes.contains_key(index)))
    }

    async fn create_index(&self, collection: &str, keys: &[&str]) -> Result<String, StoreError> {
        check_name(collection)?;
        if keys.is_empty() {
            return Err(StoreError::InvalidIndex("index needs at least one key".into()));
        }

        let name = index_name(collection);
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .indexes
            .insert(name.clone(), keys.iter().map(|k| k.to_string()).collect());
        debug!(collection, index = %name, "index created");
        Ok(name)
    }

    async fn save_articles(
        &self,
        collection: &str,
        articles: Vec<serde_json::Value>,
    ) -> Result<SaveReport, StoreError> {
        check_name(collection)?;
        if articles.is_empty() {
            return Err(StoreError::EmptyBatch);
        }

        let n = articles.len();
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .documents
            .extend(articles);
        debug!(collection, n, "articles saved");
        Ok(SaveReport { ok: 1, n })
    }

    async fn sentiment_results(&self, collection: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        Ok(self
            .lock()
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|d| d.get(SENTIMENT_FIELD).is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn has_collection_is_false_for_empty_name() {
        let store = InMemoryStore::new();
        assert!(!store.has_collection("").await.unwrap());
    }

    #[tokio::test]
    async fn create_collection_then_it_exists() {
        let store = InMemoryStore::new();
        store.create_collection("test").await.unwrap();

        assert!(store.has_collection("test").await.unwrap());
        assert_eq!(store.collections().await.unwrap(), vec!["test".to_string()]);
        assert_eq!(
            store.create_collection("test").await.unwrap_err(),
            StoreError::CollectionExists("test".into())
        );
    }

    #[tokio::test]
    async fn create_index_creates_missing_collection() {
        let store = InMemoryStore::new();
        assert!(!store
            .is_index_present("createIndexTestCollectionIndex", "createIndexTestCollection")
            .await
            .unwrap());

        let name = store
            .create_index("createIndexTestCollection", &["name", "datePublished", "description"])
            .await
            .unwrap();

        assert_eq!(name, "createIndexTestCollectionIndex");
        assert!(store.is_index_present(&name, "createIndexTestCollection").await.unwrap());
        assert!(store.has_collection("createIndexTestCollection").await.unwrap());
    }

    #[tokio::test]
    async fn save_articles_reports_count() {
        let store = InMemoryStore::new();
        let articles = vec![
            json!({ "article1": "testArticle" }),
            json!({ "article2": "testArticle" }),
            json!({ "article3": "testArticle" }),
        ];

        let report = store.save_articles("saveArticleCollection", articles).await.unwrap();
        assert_eq!(report, SaveReport { ok: 1, n: 3 });
    }

    #[tokio::test]
    async fn saving_empty_batch_fails() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.save_articles("c", vec![]).await.unwrap_err(),
            StoreError::EmptyBatch
        );
    }

    #[tokio::test]
    async fn sentiment_results_only_returns_annotated_articles() {
        let store = InMemoryStore::new();
        assert!(store.sentiment_results("testSentimentCollection").await.unwrap().is_empty());

        store
            .save_articles(
                "news",
                vec![
                    json!({ "id": "a1", "sentiment": { "score": 0.8 } }),
                    json!({ "id": "a2" }),
                ],
            )
            .await
            .unwrap();

        let results = store.sentiment_results("news").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "a1");
    }
}
