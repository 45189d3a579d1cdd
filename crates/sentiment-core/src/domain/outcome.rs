//! Outcome model: the classified result of one external-call attempt.
//!
//! Classification is a pure function of the response, so the same response
//! always yields the same outcome.

use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, JobError};

/// Result of a single attempt against the annotation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    /// `documents[0]` of the response.
    Success(serde_json::Value),

    /// Transient, permanent or internal failure.
    Failure(JobError),
}

impl AttemptOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Failure(JobError::transient(reason))
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Failure(JobError::permanent(reason))
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Failure(JobError::internal(reason))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            AttemptOutcome::Success(_) => None,
            AttemptOutcome::Failure(e) => Some(e.kind),
        }
    }
}

/// Classify an HTTP response from the annotation service.
///
/// - 2xx with `documents[0]` an object: success
/// - 2xx with an `errors` list and no documents: permanent
/// - any other 2xx body: permanent (malformed)
/// - 4xx: permanent
/// - 5xx: transient
pub fn classify_response(status: u16, body: &[u8]) -> AttemptOutcome {
    match status {
        200..=299 => classify_body(body),
        400..=499 => AttemptOutcome::permanent(format!(
            "annotation service rejected request: HTTP {status}: {}",
            snippet(body)
        )),
        500..=599 => AttemptOutcome::transient(format!(
            "annotation service unavailable: HTTP {status}: {}",
            snippet(body)
        )),
        _ => AttemptOutcome::permanent(format!("unexpected HTTP status {status}")),
    }
}

fn classify_body(body: &[u8]) -> AttemptOutcome {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return AttemptOutcome::permanent(format!("malformed response body: {e}")),
    };

    if let Some(doc) = value
        .get("documents")
        .and_then(|d| d.get(0))
        .filter(|d| d.is_object())
    {
        return AttemptOutcome::Success(doc.clone());
    }

    if let Some(first) = value.get("errors").and_then(|e| e.get(0)) {
        let message = first
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unspecified document error");
        return AttemptOutcome::permanent(format!("annotation service document error: {message}"));
    }

    AttemptOutcome::permanent("malformed response body: no documents[0]")
}

fn snippet(body: &[u8]) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const OK_BODY: &[u8] = br#"{"documents":[{"id":"x","score":0.8}],"errors":[]}"#;

    #[test]
    fn success_extracts_first_document() {
        let outcome = classify_response(200, OK_BODY);
        assert_eq!(
            outcome,
            AttemptOutcome::Success(serde_json::json!({ "id": "x", "score": 0.8 }))
        );
    }

    #[rstest]
    #[case::server_error(500, b"oops".as_slice(), ErrorKind::ExternalTransient)]
    #[case::bad_gateway(502, b"".as_slice(), ErrorKind::ExternalTransient)]
    #[case::unauthorized(401, b"denied".as_slice(), ErrorKind::ExternalPermanent)]
    #[case::bad_request(400, b"{}".as_slice(), ErrorKind::ExternalPermanent)]
    #[case::not_json(200, b"<html>".as_slice(), ErrorKind::ExternalPermanent)]
    #[case::empty_documents(200, br#"{"documents":[]}"#.as_slice(), ErrorKind::ExternalPermanent)]
    #[case::document_not_object(200, br#"{"documents":[1]}"#.as_slice(), ErrorKind::ExternalPermanent)]
    #[case::redirect(302, b"".as_slice(), ErrorKind::ExternalPermanent)]
    fn failures_are_classified(#[case] status: u16, #[case] body: &[u8], #[case] kind: ErrorKind) {
        assert_eq!(classify_response(status, body).failure_kind(), Some(kind));
    }

    #[test]
    fn document_errors_are_permanent_with_message() {
        let body = br#"{"documents":[],"errors":[{"id":"x","message":"Document text is empty."}]}"#;
        match classify_response(200, body) {
            AttemptOutcome::Failure(e) => {
                assert_eq!(e.kind, ErrorKind::ExternalPermanent);
                assert!(e.message.contains("Document text is empty."));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn classification_is_idempotent() {
        for (status, body) in [(200, OK_BODY), (503, b"busy".as_slice()), (404, b"nope".as_slice())] {
            assert_eq!(classify_response(status, body), classify_response(status, body));
        }
    }

    #[test]
    fn long_bodies_are_truncated_in_messages() {
        let body = vec![b'a'; 1000];
        match classify_response(500, &body) {
            AttemptOutcome::Failure(e) => assert!(e.message.len() < 300),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
