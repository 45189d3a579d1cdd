//! Job entity: one unit of analysis work.
//!
//! A job is transported by value on every hop. The worker that is processing
//! it holds the authoritative copy and hands the final copy back to the caller;
//! there is no shared mutable instance and no durable job store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::budget::Timeout;
use super::errors::JobError;
use super::ids::JobId;
use super::retry::RetryStrategy;
use super::state::JobState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from:?} -> {to:?}")]
    Illegal { from: JobState, to: JobState },

    #[error("attempt budget exhausted ({attempts}/{max_attempts})")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
}

/// Job record.
///
/// State transitions happen through methods only; every method checks the
/// edge against [`JobState::can_transition_to`], so a terminal job can never
/// change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,

    /// Work input (the article). Opaque to the job machinery.
    payload: serde_json::Value,

    state: JobState,

    /// Number of external-call attempts made so far.
    #[serde(default)]
    attempts: u32,

    #[serde(default)]
    timeout: Timeout,

    #[serde(default)]
    retry_strategy: RetryStrategy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
}

impl Job {
    pub fn new(payload: serde_json::Value, timeout: Timeout, retry_strategy: RetryStrategy) -> Self {
        Self::with_id(JobId::generate(), payload, timeout, retry_strategy)
    }

    pub fn with_id(
        id: JobId,
        payload: serde_json::Value,
        timeout: Timeout,
        retry_strategy: RetryStrategy,
    ) -> Self {
        Self {
            id,
            payload,
            state: JobState::Inactive,
            attempts: 0,
            timeout,
            retry_strategy,
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    /// Inactive -> Active. A job that is already active stays active.
    pub fn activate(&mut self) -> Result<(), TransitionError> {
        if self.state == JobState::Active {
            return Ok(());
        }
        self.transition(JobState::Active)
    }

    /// Count one external-call attempt. Returns the attempt number (1-indexed).
    /// Only an ACTIVE job may attempt; activation is a separate step.
    pub fn begin_attempt(&mut self) -> Result<u32, TransitionError> {
        if self.state != JobState::Active {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: JobState::Active,
            });
        }
        let max_attempts = self.retry_strategy.max_attempts();
        if self.attempts >= max_attempts {
            return Err(TransitionError::AttemptsExhausted {
                attempts: self.attempts,
                max_attempts,
            });
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// Active -> Completed with the merged result.
    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), TransitionError> {
        self.transition(JobState::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    /// Active -> Failed with the given error.
    pub fn fail(&mut self, error: JobError) -> Result<(), TransitionError> {
        self.transition(JobState::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    fn transition(&mut self, to: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Structured (bus) form. Only plain data crosses the boundary.
    pub fn to_structured(&self) -> serde_json::Value {
        // Every field is plain data with string keys, so this cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode a job from its structured form and check its invariants.
    pub fn from_structured(value: serde_json::Value) -> Result<Self, JobError> {
        let job: Job = serde_json::from_value(value)
            .map_err(|e| JobError::bad_request(format!("invalid job: {e}")))?;
        job.check_invariants()?;
        Ok(job)
    }

    fn check_invariants(&self) -> Result<(), JobError> {
        self.retry_strategy
            .validate()
            .map_err(|e| JobError::bad_request(format!("invalid retry_strategy: {e}")))?;

        let max_attempts = self.retry_strategy.max_attempts();
        if self.attempts > max_attempts {
            return Err(JobError::bad_request(format!(
                "attempts {} exceed max_attempts {max_attempts}",
                self.attempts
            )));
        }
        if self.result.is_some() && self.error.is_some() {
            return Err(JobError::bad_request("job has both result and error"));
        }
        if self.result.is_some() != (self.state == JobState::Completed) {
            return Err(JobError::bad_request(format!(
                "result must be present exactly when state is COMPLETED (state {:?})",
                self.state
            )));
        }
        if let Some(error) = &self.error
            && error.code != error.kind.code()
        {
            return Err(JobError::bad_request(format!(
                "error code {} does not match kind {:?}",
                error.code, error.kind
            )));
        }
        if self.error.is_some() != (self.state == JobState::Failed) {
            return Err(JobError::bad_request(format!(
                "error must be present exactly when state is FAILED (state {:?})",
                self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ErrorKind, codes};
    use serde_json::json;

    fn job(max_attempts: u32) -> Job {
        Job::new(
            json!({ "id": "a1", "name": "N", "description": "D" }),
            Timeout::from_secs(5),
            RetryStrategy::none(max_attempts).unwrap(),
        )
    }

    #[test]
    fn new_job_starts_inactive() {
        let job = job(3);
        assert_eq!(job.state(), JobState::Inactive);
        assert_eq!(job.attempts(), 0);
        assert!(job.result().is_none());
        assert!(job.error().is_none());
    }

    #[test]
    fn attempts_never_exceed_max() {
        let mut job = job(2);
        job.activate().unwrap();

        assert_eq!(job.begin_attempt().unwrap(), 1);
        assert_eq!(job.begin_attempt().unwrap(), 2);
        assert_eq!(
            job.begin_attempt().unwrap_err(),
            TransitionError::AttemptsExhausted {
                attempts: 2,
                max_attempts: 2
            }
        );
        assert_eq!(job.attempts(), 2);
    }

    #[test]
    fn attempt_requires_activation() {
        let mut job = job(2);
        assert!(matches!(
            job.begin_attempt(),
            Err(TransitionError::Illegal { from: JobState::Inactive, .. })
        ));
    }

    #[test]
    fn activate_is_idempotent_while_active() {
        let mut job = job(2);
        job.activate().unwrap();
        job.activate().unwrap();
        assert_eq!(job.state(), JobState::Active);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut done = job(2);
        done.activate().unwrap();
        done.complete(json!({ "ok": true })).unwrap();

        assert!(done.fail(JobError::internal("late")).is_err());
        assert!(done.activate().is_err());
        assert!(done.begin_attempt().is_err());
        assert_eq!(done.state(), JobState::Completed);
        assert!(done.error().is_none());

        let mut failed = job(2);
        failed.activate().unwrap();
        failed.fail(JobError::transient("down")).unwrap();

        assert!(failed.complete(json!({})).is_err());
        assert_eq!(failed.state(), JobState::Failed);
        assert!(failed.result().is_none());
    }

    #[test]
    fn cannot_complete_inactive_job() {
        let mut job = job(1);
        assert!(job.complete(json!({})).is_err());
        assert_eq!(job.state(), JobState::Inactive);
    }

    #[test]
    fn structured_roundtrip_preserves_fields() {
        let mut completed = job(3);
        completed.activate().unwrap();
        completed.begin_attempt().unwrap();
        completed.complete(json!({ "sentiment": { "score": 0.8 } })).unwrap();

        let back = Job::from_structured(completed.to_structured()).unwrap();
        assert_eq!(back, completed);

        let mut failed = job(1);
        failed.activate().unwrap();
        failed.begin_attempt().unwrap();
        failed.fail(JobError::transient("boom")).unwrap();

        let back = Job::from_structured(failed.to_structured()).unwrap();
        assert_eq!(back.id(), failed.id());
        assert_eq!(back.attempts(), 1);
        assert_eq!(back.state(), JobState::Failed);
        assert_eq!(back.timeout(), failed.timeout());
        assert_eq!(back.retry_strategy(), failed.retry_strategy());
        assert_eq!(back.error().map(|e| e.kind), Some(ErrorKind::ExternalTransient));
    }

    #[test]
    fn structured_form_uses_wire_names() {
        let v = job(3).to_structured();
        assert_eq!(v["state"], "INACTIVE");
        assert_eq!(v["attempts"], 0);
        assert_eq!(v["timeout"], 5000);
        assert!(v.get("result").is_none());
        assert!(v["id"].is_string());
    }

    #[test]
    fn minimal_structured_form_gets_defaults() {
        let id = JobId::generate();
        let v = json!({ "id": id, "payload": { "name": "N" }, "state": "INACTIVE" });

        let job = Job::from_structured(v).unwrap();
        assert_eq!(job.id(), &id);
        assert_eq!(job.attempts(), 0);
        assert_eq!(job.timeout(), Timeout::default());
        assert_eq!(job.retry_strategy(), &RetryStrategy::default());
    }

    #[test]
    fn foreign_job_id_survives_roundtrip() {
        let uuid = "3f2b8c1e-9d4a-4e6b-8f1a-2c3d4e5f6a7b";
        let v = json!({
            "id": uuid,
            "payload": { "id": "a1", "name": "N", "description": "D" },
            "state": "INACTIVE"
        });

        let job = Job::from_structured(v).unwrap();
        assert_eq!(job.id().as_str(), uuid);
        assert_eq!(job.to_structured()["id"], uuid);

        assert!(Job::from_structured(json!({ "id": "", "payload": {}, "state": "INACTIVE" })).is_err());
    }

    #[test]
    fn structured_form_with_broken_invariants_is_rejected() {
        let mut v = job(2).to_structured();
        v["attempts"] = json!(3);
        let err = Job::from_structured(v).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let mut v = job(2).to_structured();
        v["result"] = json!({});
        assert!(Job::from_structured(v).is_err());

        let mut v = job(2).to_structured();
        v["state"] = json!("COMPLETED");
        assert!(Job::from_structured(v).is_err());

        assert!(Job::from_structured(json!("not a job")).is_err());

        let mut failed = job(2);
        failed.activate().unwrap();
        failed.fail(JobError::timeout("late")).unwrap();
        let mut v = failed.to_structured();
        v["error"]["code"] = json!(codes::BAD_REQUEST);
        let err = Job::from_structured(v).unwrap_err();
        assert!(err.message.contains("does not match kind"));
    }
}
