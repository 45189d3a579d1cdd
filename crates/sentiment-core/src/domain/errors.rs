//! Errors - 失敗の分類と呼び出し側に返す構造化エラー
//!
//! - BadRequest: 受信 payload の不正（リトライしない）
//! - ExternalTransient: ネットワーク / timeout / 5xx（policy に従ってリトライ）
//! - ExternalPermanent: 4xx / 外部レスポンス不正（リトライしない）
//! - Timeout: job の deadline 超過（終端）
//! - InternalFault: 想定外の欠陥（終端）

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::Job;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    ExternalTransient,
    ExternalPermanent,
    Timeout,
    InternalFault,
}

impl ErrorKind {
    /// Only transient external failures go through the retry loop.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ExternalTransient)
    }

    /// Numeric code sent back to automated callers.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::ExternalTransient | ErrorKind::ExternalPermanent => codes::EXTERNAL_FAILURE,
            ErrorKind::BadRequest => codes::BAD_REQUEST,
            ErrorKind::Timeout => codes::TIMEOUT,
            ErrorKind::InternalFault => codes::INTERNAL_FAULT,
        }
    }

    /// Best-effort kind for a bare code. A code-1 failure that reached the
    /// caller is final (retries exhausted or never allowed), so it decodes
    /// as permanent.
    pub fn from_code(code: i32) -> Self {
        match code {
            codes::EXTERNAL_FAILURE => ErrorKind::ExternalPermanent,
            codes::BAD_REQUEST => ErrorKind::BadRequest,
            codes::TIMEOUT => ErrorKind::Timeout,
            _ => ErrorKind::InternalFault,
        }
    }
}

/// Failure codes on the reply channel.
pub mod codes {
    /// External annotation service failed (retries exhausted or permanent failure).
    pub const EXTERNAL_FAILURE: i32 = 1;
    /// The inbound request was malformed.
    pub const BAD_REQUEST: i32 = 2;
    /// The job's timeout elapsed.
    pub const TIMEOUT: i32 = 3;
    /// Unexpected defect inside the worker.
    pub const INTERNAL_FAULT: i32 = 4;
}

/// The `error` slot of a job: a reason plus a numeric classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?} (code {code}): {message}")]
pub struct JobError {
    pub code: i32,
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalTransient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalPermanent, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalFault, message)
    }
}

/// What a caller gets back instead of a completed job.
///
/// `job` is the final copy of the job when the request decoded into one
/// (state FAILED, or INACTIVE for a rejected request); `None` when the
/// request could not even be read as a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("[{}] {}", .error.code, .error.message)]
pub struct JobFailure {
    pub error: JobError,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

impl JobFailure {
    pub fn new(error: JobError, job: Option<Job>) -> Self {
        Self { error, job }
    }

    pub fn code(&self) -> i32 {
        self.error.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::ExternalTransient, 1, true)]
    #[case(ErrorKind::ExternalPermanent, 1, false)]
    #[case(ErrorKind::BadRequest, 2, false)]
    #[case(ErrorKind::Timeout, 3, false)]
    #[case(ErrorKind::InternalFault, 4, false)]
    fn kinds_map_to_codes(#[case] kind: ErrorKind, #[case] code: i32, #[case] retryable: bool) {
        assert_eq!(kind.code(), code);
        assert_eq!(kind.is_retryable(), retryable);
        assert_eq!(JobError::new(kind, "x").code, code);
    }

    #[test]
    fn unknown_codes_are_internal_faults() {
        assert_eq!(ErrorKind::from_code(99), ErrorKind::InternalFault);
        assert_eq!(ErrorKind::from_code(2), ErrorKind::BadRequest);
    }

    #[rstest]
    #[case(ErrorKind::ExternalTransient)]
    #[case(ErrorKind::ExternalPermanent)]
    #[case(ErrorKind::BadRequest)]
    #[case(ErrorKind::Timeout)]
    #[case(ErrorKind::InternalFault)]
    fn decoded_kind_has_the_same_code(#[case] kind: ErrorKind) {
        assert_eq!(ErrorKind::from_code(kind.code()).code(), kind.code());
    }

    #[test]
    fn surfaced_external_failure_is_not_retryable() {
        let kind = ErrorKind::from_code(codes::EXTERNAL_FAILURE);
        assert_eq!(kind, ErrorKind::ExternalPermanent);
        assert!(!kind.is_retryable());
    }

    #[test]
    fn failure_display_has_code_and_message() {
        let f = JobFailure::new(JobError::bad_request("missing field `description`"), None);
        assert_eq!(f.to_string(), "[2] missing field `description`");
    }
}
