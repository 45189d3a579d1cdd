//! Domain model (IDs, job state machine, retry policy, outcomes, ...).
//!
//! ここは I/O を持たない純粋なレイヤー。bus / HTTP / store は ports 側。

pub mod article;
pub mod budget;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod retry;
pub mod state;

pub use article::{AnnotationRequest, Article, Document, SENTIMENT_FIELD, merge_annotation};
pub use budget::Timeout;
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, JobError, JobFailure, codes};
pub use ids::{JobId, RequestId};
pub use job::{Job, TransitionError};
pub use outcome::{AttemptOutcome, classify_response};
pub use retry::{BackoffKind, RetryStrategy, RetryStrategyError};
pub use state::JobState;
