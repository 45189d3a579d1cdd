//! Discovery port - health channel and service records.
//!
//! A record says "service `name` is reachable at `address`". Callers find
//! workers by name and never by instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic on which record changes are announced.
pub const ANNOUNCE_TOPIC: &str = "discovery.announce";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub address: String,
    pub status: ServiceStatus,
    /// Handle returned by `publish`, used to withdraw the record.
    pub registration: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("unknown registration `{0}`")]
    UnknownRegistration(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("discovery unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Publish an UP record and announce it.
    async fn publish(&self, name: &str, address: &str) -> Result<ServiceRecord, DiscoveryError>;

    /// Announce the record as DOWN and withdraw it.
    async fn unpublish(&self, registration: &str) -> Result<ServiceRecord, DiscoveryError>;

    /// First UP record published under `name`.
    async fn lookup(&self, name: &str) -> Result<Option<ServiceRecord>, DiscoveryError>;

    async fn records(&self) -> Vec<ServiceRecord>;
}
