//! Article payload: what the analyser needs from a job, and what it sends out.

use serde::{Deserialize, Serialize};

use super::errors::JobError;
use super::ids::JobId;

/// Field the annotation is merged under.
pub const SENTIMENT_FIELD: &str = "sentiment";

/// The fields of an article the analyser reads. Everything else in the
/// payload is carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// `id`, or `url` when the article has no `id`.
    pub key: String,
    pub name: String,
    pub description: String,
}

impl Article {
    /// Validate the inbound payload shape.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, JobError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| JobError::bad_request("payload must be a JSON object"))?;

        let key = string_field(obj, "id")
            .or_else(|| string_field(obj, "url"))
            .ok_or_else(|| JobError::bad_request("payload needs a string `id` or `url`"))?;
        let name = string_field(obj, "name")
            .ok_or_else(|| JobError::bad_request("missing string field `name`"))?;
        let description = string_field(obj, "description")
            .ok_or_else(|| JobError::bad_request("missing string field `description`"))?;

        Ok(Self {
            key: key.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    pub fn analysis_text(&self) -> String {
        format!("{}. {}", self.name, self.description)
    }
}

fn string_field<'a>(obj: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(serde_json::Value::as_str)
}

/// One document of the outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub language: String,
    pub id: String,
    pub text: String,
}

/// Outbound request body: a document list of exactly one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRequest {
    pub documents: Vec<Document>,
}

impl AnnotationRequest {
    /// The document id is the job id, so every attempt of one job carries
    /// the same identifier.
    pub fn for_article(job_id: &JobId, article: &Article, language: &str) -> Self {
        Self {
            documents: vec![Document {
                language: language.to_string(),
                id: job_id.as_str().to_string(),
                text: article.analysis_text(),
            }],
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        self.documents.first().map(|d| d.id.as_str())
    }
}

/// Copy of `payload` with `annotation` added under [`SENTIMENT_FIELD`].
pub fn merge_annotation(payload: &serde_json::Value, annotation: serde_json::Value) -> serde_json::Value {
    let mut merged = payload.clone();
    if let Some(obj) = merged.as_object_mut() {
        obj.insert(SENTIMENT_FIELD.to_string(), annotation);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn reads_required_fields() {
        let a = Article::from_payload(&json!({ "id": "a1", "name": "N", "description": "D", "extra": 1 }))
            .unwrap();
        assert_eq!(a.key, "a1");
        assert_eq!(a.analysis_text(), "N. D");
    }

    #[test]
    fn url_identifies_article_without_id() {
        let a = Article::from_payload(&json!({ "url": "https://x/1", "name": "N", "description": "D" }))
            .unwrap();
        assert_eq!(a.key, "https://x/1");
    }

    #[rstest]
    #[case::missing_description(json!({ "id": "a1", "name": "N" }))]
    #[case::missing_name(json!({ "id": "a1", "description": "D" }))]
    #[case::missing_identifier(json!({ "name": "N", "description": "D" }))]
    #[case::wrong_type(json!({ "id": "a1", "name": "N", "description": 7 }))]
    #[case::not_an_object(json!(["a1"]))]
    fn malformed_payloads_are_bad_requests(#[case] payload: serde_json::Value) {
        let err = Article::from_payload(&payload).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.code, 2);
    }

    #[test]
    fn request_has_one_document_keyed_by_job_id() {
        let job_id = JobId::generate();
        let article = Article::from_payload(&json!({ "id": "a1", "name": "N", "description": "D" })).unwrap();

        let req = AnnotationRequest::for_article(&job_id, &article, "en");
        let v = serde_json::to_value(&req).unwrap();

        assert_eq!(v["documents"].as_array().map(Vec::len), Some(1));
        assert_eq!(v["documents"][0]["language"], "en");
        assert_eq!(v["documents"][0]["text"], "N. D");
        assert_eq!(req.document_id(), Some(job_id.as_str()));
    }

    #[test]
    fn merge_keeps_original_fields() {
        let payload = json!({ "id": "a1", "name": "N" });
        let merged = merge_annotation(&payload, json!({ "score": 0.8 }));

        assert_eq!(merged["id"], "a1");
        assert_eq!(merged["name"], "N");
        assert_eq!(merged["sentiment"]["score"], 0.8);
        assert!(payload.get("sentiment").is_none());
    }
}
