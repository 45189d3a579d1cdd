//! AnalyserWorker - 1 リクエスト分の処理（validate → attempt → classify → decide → reply）
//!
//! # 学習ポイント
//! - リトライは「同じハンドラに再入」ではなく、process の中の明示的なループ
//! - attempt は必ず直列（前の attempt が解決してから次を考える）
//! - deadline は activate した瞬間から。各 attempt は残り予算で `tokio::time::timeout`
//!   され、期限切れなら in-flight の future を drop する（遅れて届いた応答は捨てられる）
//! - 失敗は `JobFailure`（code + message + 最終 job）として返す。panic は handle() で
//!   internal fault に変換される

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use crate::domain::{
    AnnotationRequest, Article, AttemptOutcome, Decider, Decision, Job, JobError, JobFailure,
    codes, merge_annotation,
};
use crate::observability::WorkerStats;
use crate::ports::{Annotator, Delivery, Failure};

pub struct AnalyserWorker {
    annotator: Arc<dyn Annotator>,
    decider: Arc<dyn Decider>,
    stats: Arc<WorkerStats>,
    language: String,
}

impl AnalyserWorker {
    pub fn new(annotator: Arc<dyn Annotator>, decider: Arc<dyn Decider>, language: impl Into<String>) -> Self {
        Self {
            annotator,
            decider,
            stats: Arc::new(WorkerStats::new()),
            language: language.into(),
        }
    }

    /// Share counters with other instances.
    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Process one job request (the job's structured form).
    ///
    /// Returns the COMPLETED job, or a failure carrying the final job copy.
    #[tracing::instrument(name = "process", skip_all, fields(job_id = tracing::field::Empty))]
    pub async fn process(&self, request: serde_json::Value) -> Result<Job, JobFailure> {
        self.stats.record_received();
        let result = self.run(request).await;
        match &result {
            Ok(_) => self.stats.record_completed(),
            Err(_) => self.stats.record_failed(),
        }
        result
    }

    /// Answer a bus delivery with the outcome of [`process`](Self::process).
    ///
    /// Processing runs in its own task, so a panic becomes an internal-fault
    /// reply instead of taking the calling slot down.
    pub async fn handle(self: Arc<Self>, mut delivery: Delivery) {
        let body = delivery.take_body();
        let request_id = delivery.id();
        let stats = Arc::clone(&self.stats);

        let joined = tokio::spawn(
            async move { self.process(body).await }
                .instrument(tracing::debug_span!("delivery", request_id = %request_id)),
        )
        .await;

        match joined {
            Ok(Ok(job)) => delivery.reply(job.to_structured()),
            Ok(Err(failure)) => delivery.fail(failure_reply(&failure)),
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "processing task aborted");
                stats.record_failed();
                delivery.fail(Failure::new(
                    codes::INTERNAL_FAULT,
                    format!("processing aborted: {e}"),
                ));
            }
        }
    }

    async fn run(&self, request: serde_json::Value) -> Result<Job, JobFailure> {
        let mut job = Job::from_structured(request).map_err(|e| JobFailure::new(e, None))?;
        tracing::Span::current().record("job_id", tracing::field::display(job.id()));

        // Validation happens before activation: a rejected job comes back untouched.
        if job.state().is_terminal() {
            let error = JobError::bad_request(format!("job is already {:?}", job.state()));
            return Err(JobFailure::new(error, Some(job)));
        }
        // A redelivered ACTIVE job resumes from its count, but only if an attempt is left.
        let max_attempts = job.retry_strategy().max_attempts();
        if job.attempts() >= max_attempts {
            let error = JobError::bad_request(format!(
                "attempt budget already spent ({}/{max_attempts})",
                job.attempts()
            ));
            return Err(JobFailure::new(error, Some(job)));
        }
        let article = match Article::from_payload(job.payload()) {
            Ok(article) => article,
            Err(error) => {
                warn!(error = %error.message, "rejected malformed request");
                return Err(JobFailure::new(error, Some(job)));
            }
        };
        let request = AnnotationRequest::for_article(job.id(), &article, &self.language);

        if let Err(e) = job.activate() {
            return Err(JobFailure::new(JobError::internal(e.to_string()), Some(job)));
        }
        let timeout = job.timeout();
        let deadline = Instant::now() + timeout.as_duration();
        debug!(article = %article.key, %timeout, "job activated");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.fail(job, JobError::timeout(format!("job timeout {timeout} elapsed"))));
            }

            let attempt = match job.begin_attempt() {
                Ok(attempt) => attempt,
                Err(e) => return Err(self.fail(job, JobError::internal(e.to_string()))),
            };
            self.stats.record_attempt();
            info!(attempt, ?remaining, "attempt started");

            let outcome = match tokio::time::timeout(remaining, self.annotator.annotate(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(self.fail(
                        job,
                        JobError::timeout(format!("job timeout {timeout} elapsed during attempt {attempt}")),
                    ));
                }
            };

            let error = match outcome {
                AttemptOutcome::Success(annotation) => {
                    let result = merge_annotation(job.payload(), annotation);
                    if let Err(e) = job.complete(result) {
                        return Err(self.fail(job, JobError::internal(e.to_string())));
                    }
                    info!(attempts = job.attempts(), "job completed");
                    return Ok(job);
                }
                AttemptOutcome::Failure(error) => error,
            };
            warn!(attempt, kind = ?error.kind, error = %error.message, "attempt failed");

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.decider.decide(&job, &error, remaining) {
                Decision::Retry { delay, reason } => {
                    info!(?delay, %reason, "retry scheduled");
                    tokio::time::sleep(delay).await;
                }
                Decision::Fail { error } => return Err(self.fail(job, error)),
            }
        }
    }

    fn fail(&self, mut job: Job, error: JobError) -> JobFailure {
        tracing::error!(
            code = error.code,
            kind = ?error.kind,
            attempts = job.attempts(),
            error = %error.message,
            "job failed"
        );
        if let Err(e) = job.fail(error.clone()) {
            warn!(error = %e, "could not mark job failed");
        }
        JobFailure::new(error, Some(job))
    }
}

/// Bus form of a failure: code and message, with the full failure as detail.
pub fn failure_reply(failure: &JobFailure) -> Failure {
    let reply = Failure::new(failure.code(), failure.message());
    match serde_json::to_value(failure) {
        Ok(detail) => reply.with_detail(detail),
        Err(_) => reply,
    }
}
