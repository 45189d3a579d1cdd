//! InMemoryDiscovery - service records kept in process, changes announced on the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use ulid::Ulid;

use crate::ports::{
    ANNOUNCE_TOPIC, Discovery, DiscoveryError, MessageBus, ServiceRecord, ServiceStatus,
};

#[derive(Clone)]
pub struct InMemoryDiscovery {
    bus: Arc<dyn MessageBus>,
    records: Arc<Mutex<HashMap<String, ServiceRecord>>>,
}

impl InMemoryDiscovery {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServiceRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn announce(&self, record: &ServiceRecord) {
        match serde_json::to_value(record) {
            Ok(body) => self.bus.publish(ANNOUNCE_TOPIC, body),
            Err(e) => tracing::warn!(error = %e, "failed to encode service record"),
        }
    }
}

#[async_trait]
impl Discovery for InMemoryDiscovery {
    async fn publish(&self, name: &str, address: &str) -> Result<ServiceRecord, DiscoveryError> {
        if name.trim().is_empty() || address.trim().is_empty() {
            return Err(DiscoveryError::InvalidRecord(
                "name and address must not be empty".into(),
            ));
        }

        let record = ServiceRecord {
            name: name.to_string(),
            address: address.to_string(),
            status: ServiceStatus::Up,
            registration: Ulid::new().to_string(),
            published_at: Utc::now(),
        };
        self.lock()
            .insert(record.registration.clone(), record.clone());

        info!(name, address, registration = %record.registration, "service published UP");
        self.announce(&record);
        Ok(record)
    }

    async fn unpublish(&self, registration: &str) -> Result<ServiceRecord, DiscoveryError> {
        let mut record = self
            .lock()
            .remove(registration)
            .ok_or_else(|| DiscoveryError::UnknownRegistration(registration.to_string()))?;

        record.status = ServiceStatus::Down;
        record.published_at = Utc::now();

        info!(name = %record.name, address = %record.address, registration, "service published DOWN");
        self.announce(&record);
        Ok(record)
    }

    async fn lookup(&self, name: &str) -> Result<Option<ServiceRecord>, DiscoveryError> {
        Ok(self
            .lock()
            .values()
            .filter(|r| r.name == name && r.status == ServiceStatus::Up)
            .min_by_key(|r| r.published_at)
            .cloned())
    }

    async fn records(&self) -> Vec<ServiceRecord> {
        let mut records: Vec<_> = self.lock().values().cloned().collect();
        records.sort_by_key(|r| r.published_at);
        records
    }
}
