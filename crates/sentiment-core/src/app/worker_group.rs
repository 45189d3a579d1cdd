//! WorkerGroup - 1 つの論理アドレスの後ろに N 個の worker slot
//!
//! # 学習ポイント
//! - slot ごとに consumer を 1 つ登録し、同じアドレスで配送を奪い合う
//! - 停止は `watch` チャネルで通知。処理中の配送は最後まで処理してから抜ける（drain）
//! - health の順序: start は「全 consumer 登録 → UP」、stop は「DOWN → drain → 登録解除」
//! - 起動途中で失敗したら、登録済みの consumer を戻して UP は出さない

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::worker::AnalyserWorker;
use crate::config::AnalyserConfig;
use crate::observability::{WorkerCounts, WorkerStats};
use crate::ports::{BusError, Consumer, Discovery, DiscoveryError, MessageBus, ServiceRecord};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("a worker group needs at least one instance")]
    NoInstances,

    #[error("failed to register consumer at `{address}`: {source}")]
    Register {
        address: String,
        #[source]
        source: BusError,
    },

    #[error("failed to publish service record: {0}")]
    Publish(#[from] DiscoveryError),
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("failed to withdraw service record: {0}")]
    Unpublish(#[from] DiscoveryError),

    #[error("failed to unregister consumer: {0}")]
    Unregister(#[from] BusError),

    #[error("worker slot {slot} did not stop cleanly: {reason}")]
    Slot { slot: usize, reason: String },
}

/// Where and how many instances to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub service_name: String,
    pub address: String,
    pub instances: usize,
}

impl Deployment {
    pub fn from_config(config: &AnalyserConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            address: config.address.clone(),
            instances: config.instances,
        }
    }
}

/// Running worker instances plus their published health record.
pub struct WorkerGroup {
    deployment: Deployment,
    record: ServiceRecord,
    discovery: Arc<dyn Discovery>,
    stats: Arc<WorkerStats>,
    shutdown_tx: watch::Sender<bool>,
    slots: Vec<JoinHandle<Box<dyn Consumer>>>,
}

impl WorkerGroup {
    /// Register `instances` consumers, then publish UP.
    pub async fn start(
        worker: Arc<AnalyserWorker>,
        bus: Arc<dyn MessageBus>,
        discovery: Arc<dyn Discovery>,
        deployment: Deployment,
    ) -> Result<Self, StartError> {
        if deployment.instances == 0 {
            return Err(StartError::NoInstances);
        }

        let mut consumers = Vec::with_capacity(deployment.instances);
        for _ in 0..deployment.instances {
            match bus.consumer(&deployment.address).await {
                Ok(consumer) => consumers.push(consumer),
                Err(source) => {
                    unregister_all(consumers).await;
                    return Err(StartError::Register {
                        address: deployment.address.clone(),
                        source,
                    });
                }
            }
        }

        let record = match discovery
            .publish(&deployment.service_name, &deployment.address)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                unregister_all(consumers).await;
                return Err(StartError::Publish(e));
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slots = consumers
            .into_iter()
            .enumerate()
            .map(|(slot, consumer)| {
                tokio::spawn(slot_loop(
                    slot,
                    Arc::clone(&worker),
                    consumer,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(
            service = %deployment.service_name,
            address = %deployment.address,
            instances = deployment.instances,
            "worker group started"
        );

        Ok(Self {
            deployment,
            record,
            discovery,
            stats: Arc::clone(worker.stats()),
            shutdown_tx,
            slots,
        })
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// The UP record published at start.
    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }

    pub fn counts(&self) -> WorkerCounts {
        self.stats.snapshot()
    }

    /// Publish DOWN, drain in-flight requests, unregister every consumer.
    ///
    /// Every step runs even if an earlier one failed; the first error is returned.
    pub async fn stop(self) -> Result<(), StopError> {
        let mut first_error: Option<StopError> = None;

        if let Err(e) = self.discovery.unpublish(&self.record.registration).await {
            warn!(error = %e, "failed to withdraw service record");
            first_error.get_or_insert(StopError::Unpublish(e));
        }

        // Receivers may already be gone if every slot exited on its own.
        let _ = self.shutdown_tx.send(true);

        let mut consumers = Vec::with_capacity(self.slots.len());
        for (slot, join) in self.slots.into_iter().enumerate() {
            match join.await {
                Ok(consumer) => consumers.push(consumer),
                Err(e) => {
                    warn!(slot, error = %e, "worker slot ended abnormally");
                    first_error.get_or_insert(StopError::Slot {
                        slot,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for consumer in consumers {
            if let Err(e) = consumer.unregister().await {
                warn!(error = %e, "failed to unregister consumer");
                first_error.get_or_insert(StopError::Unregister(e));
            }
        }

        info!(
            service = %self.deployment.service_name,
            address = %self.deployment.address,
            "worker group stopped"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// One processing slot: one delivery at a time until shutdown. Hands its
/// consumer back so `stop` can unregister it.
async fn slot_loop(
    slot: usize,
    worker: Arc<AnalyserWorker>,
    mut consumer: Box<dyn Consumer>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Box<dyn Consumer> {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let delivery = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                // Sender dropped: nobody can stop us anymore, so stop now.
                if changed.is_err() {
                    break;
                }
                continue;
            }
            delivery = consumer.next() => delivery,
        };

        let Some(delivery) = delivery else {
            debug!(slot, "address closed");
            break;
        };

        // In-flight work is finished even if shutdown arrives meanwhile.
        Arc::clone(&worker).handle(delivery).await;
    }
    debug!(slot, address = consumer.address(), "worker slot exiting");
    consumer
}

async fn unregister_all(consumers: Vec<Box<dyn Consumer>>) {
    for consumer in consumers {
        if let Err(e) = consumer.unregister().await {
            warn!(error = %e, "rollback: failed to unregister consumer");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::app::worker::testing::{ScriptedAnnotator, score};
    use crate::domain::{DefaultDecider, Job, RetryStrategy, Timeout};
    use crate::impls::{InMemoryBus, InMemoryDiscovery};
    use crate::ports::ANNOUNCE_TOPIC;

    const ADDRESS: &str = "sentiment.analyser.worker";

    fn deployment(instances: usize) -> Deployment {
        Deployment {
            service_name: "news-analyser".into(),
            address: ADDRESS.into(),
            instances,
        }
    }

    fn worker(annotator: ScriptedAnnotator) -> Arc<AnalyserWorker> {
        Arc::new(AnalyserWorker::new(
            Arc::new(annotator),
            Arc::new(DefaultDecider::new(Duration::from_millis(10))),
            "en",
        ))
    }

    fn job_request() -> serde_json::Value {
        Job::new(
            json!({ "id": "a1", "name": "N", "description": "D" }),
            Timeout::from_secs(30),
            RetryStrategy::default(),
        )
        .to_structured()
    }

    #[tokio::test]
    async fn scenario_e_up_on_start_down_before_stop_returns() {
        let bus = InMemoryBus::new();
        let discovery = Arc::new(InMemoryDiscovery::new(Arc::new(bus.clone())));
        let mut announcements = bus.subscribe(ANNOUNCE_TOPIC);

        let group = WorkerGroup::start(
            worker(ScriptedAnnotator::always(score(0.8))),
            Arc::new(bus.clone()),
            discovery.clone(),
            deployment(2),
        )
        .await
        .unwrap();

        let up = announcements.recv().await.unwrap();
        assert_eq!(up["status"], "UP");
        assert_eq!(up["address"], ADDRESS);
        assert_eq!(bus.consumer_count(ADDRESS), 2);

        group.stop().await.unwrap();

        let down = announcements.try_recv().unwrap();
        assert_eq!(down["status"], "DOWN");
        assert_eq!(bus.consumer_count(ADDRESS), 0);
        assert!(discovery.lookup("news-analyser").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requests_are_served_at_the_logical_address() {
        let bus = InMemoryBus::new();
        let discovery = Arc::new(InMemoryDiscovery::new(Arc::new(bus.clone())));
        let group = WorkerGroup::start(
            worker(ScriptedAnnotator::always(score(0.8))),
            Arc::new(bus.clone()),
            discovery,
            deployment(3),
        )
        .await
        .unwrap();

        let mut pending = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let bus = bus.clone();
            pending.spawn(async move {
                bus.request(ADDRESS, job_request(), Duration::from_secs(5)).await
            });
        }
        while let Some(reply) = pending.join_next().await {
            assert_eq!(reply.unwrap().unwrap()["state"], "COMPLETED");
        }

        assert_eq!(group.counts().completed, 6);
        group.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drains_in_flight_request() {
        let bus = InMemoryBus::new();
        let discovery = Arc::new(InMemoryDiscovery::new(Arc::new(bus.clone())));
        let group = WorkerGroup::start(
            worker(ScriptedAnnotator::always(score(0.8)).with_latency(Duration::from_millis(200))),
            Arc::new(bus.clone()),
            discovery,
            deployment(1),
        )
        .await
        .unwrap();

        let requester = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.request(ADDRESS, job_request(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        group.stop().await.unwrap();

        let reply = requester.await.unwrap().unwrap();
        assert_eq!(reply["state"], "COMPLETED");
    }

    #[tokio::test]
    async fn zero_instances_is_rejected() {
        let bus = InMemoryBus::new();
        let discovery = Arc::new(InMemoryDiscovery::new(Arc::new(bus.clone())));
        let result = WorkerGroup::start(
            worker(ScriptedAnnotator::always(score(0.8))),
            Arc::new(bus),
            discovery,
            deployment(0),
        )
        .await;
        assert!(matches!(result, Err(StartError::NoInstances)));
    }

    struct UnavailableDiscovery;

    #[async_trait]
    impl Discovery for UnavailableDiscovery {
        async fn publish(&self, _name: &str, _address: &str) -> Result<ServiceRecord, DiscoveryError> {
            Err(DiscoveryError::Unavailable("registry down".into()))
        }

        async fn unpublish(&self, registration: &str) -> Result<ServiceRecord, DiscoveryError> {
            Err(DiscoveryError::UnknownRegistration(registration.into()))
        }

        async fn lookup(&self, _name: &str) -> Result<Option<ServiceRecord>, DiscoveryError> {
            Ok(None)
        }

        async fn records(&self) -> Vec<ServiceRecord> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn failed_publish_rolls_back_registrations() {
        let bus = InMemoryBus::new();
        let mut announcements = bus.subscribe(ANNOUNCE_TOPIC);

        let result = WorkerGroup::start(
            worker(ScriptedAnnotator::always(score(0.8))),
            Arc::new(bus.clone()),
            Arc::new(UnavailableDiscovery),
            deployment(2),
        )
        .await;

        assert!(matches!(result, Err(StartError::Publish(_))));
        assert_eq!(bus.consumer_count(ADDRESS), 0);
        assert!(announcements.try_recv().is_err());
    }
}
