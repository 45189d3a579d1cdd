//! AnalyserClient - 明示的な型付きクライアント
//!
//! Job を構造化形式にして bus に送り、返ってきた reply / failure を型に戻す。
//! 呼び出し側はアドレス（または discovery の service 名）だけを知っていればよい。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::domain::{ErrorKind, Job, JobError, JobFailure, RetryStrategy, Timeout};
use crate::ports::{BusError, Discovery, DiscoveryError, Failure, MessageBus};

const DEFAULT_REPLY_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    /// The worker answered with a structured failure.
    #[error("job failed: {0}")]
    Rejected(JobFailure),

    #[error(transparent)]
    Bus(BusError),

    #[error("service `{0}` is not available")]
    Unavailable(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("malformed reply: {0}")]
    Codec(String),
}

impl ClientError {
    /// The structured failure, when the worker produced one.
    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            ClientError::Rejected(failure) => Some(failure),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AnalyserClient {
    bus: Arc<dyn MessageBus>,
    address: String,
    reply_margin: Duration,
    timeout: Timeout,
    retry_strategy: RetryStrategy,
}

impl AnalyserClient {
    pub fn new(bus: Arc<dyn MessageBus>, address: impl Into<String>) -> Self {
        Self {
            bus,
            address: address.into(),
            reply_margin: DEFAULT_REPLY_MARGIN,
            timeout: Timeout::default(),
            retry_strategy: RetryStrategy::default(),
        }
    }

    /// Resolve the worker address through discovery.
    pub async fn discover(
        bus: Arc<dyn MessageBus>,
        discovery: &dyn Discovery,
        service_name: &str,
    ) -> Result<Self, ClientError> {
        let record = discovery
            .lookup(service_name)
            .await?
            .ok_or_else(|| ClientError::Unavailable(service_name.to_string()))?;
        debug!(service = service_name, address = %record.address, "discovered analyser");
        Ok(Self::new(bus, record.address))
    }

    /// Defaults for jobs created with [`new_job`](Self::new_job).
    pub fn with_job_defaults(mut self, timeout: Timeout, retry_strategy: RetryStrategy) -> Self {
        self.timeout = timeout;
        self.retry_strategy = retry_strategy;
        self
    }

    /// Extra time on top of the job timeout before the client stops waiting.
    pub fn with_reply_margin(mut self, margin: Duration) -> Self {
        self.reply_margin = margin;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn new_job(&self, payload: serde_json::Value) -> Job {
        Job::new(payload, self.timeout, self.retry_strategy)
    }

    /// Submit a job and wait for the final copy.
    pub async fn submit(&self, job: Job) -> Result<Job, ClientError> {
        let wait = job.timeout().as_duration().saturating_add(self.reply_margin);
        debug!(job_id = %job.id(), address = %self.address, "submitting job");

        match self.bus.request(&self.address, job.to_structured(), wait).await {
            Ok(body) => Job::from_structured(body).map_err(|e| ClientError::Codec(e.message)),
            Err(BusError::Failure(failure)) => Err(ClientError::Rejected(decode_failure(failure))),
            Err(e) => Err(ClientError::Bus(e)),
        }
    }

    /// Wrap `article` in a new job and submit it.
    pub async fn analyse(&self, article: serde_json::Value) -> Result<Job, ClientError> {
        self.submit(self.new_job(article)).await
    }
}

/// Rebuild the structured failure from a bus failure. Falls back to the
/// bare code and message when no detail was attached.
pub fn decode_failure(failure: Failure) -> JobFailure {
    if let Some(detail) = failure.detail.clone()
        && let Ok(decoded) = serde_json::from_value::<JobFailure>(detail)
    {
        return decoded;
    }
    let error = JobError {
        code: failure.code,
        kind: ErrorKind::from_code(failure.code),
        message: failure.message,
    };
    JobFailure::new(error, None)
}
