//! Annotator port - 外部アノテーションサービスの境界
//!
//! 1 回の呼び出し = 1 attempt。分類済みの結果（AttemptOutcome）を返し、
//! エラーを投げない。リトライ判断は worker 側。

use async_trait::async_trait;

use crate::domain::{AnnotationRequest, AttemptOutcome};

/// One external-call attempt against the annotation service.
///
/// Implementations must not retry internally: every call is exactly one
/// attempt as counted by the job.
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn annotate(&self, request: &AnnotationRequest) -> AttemptOutcome;
}
