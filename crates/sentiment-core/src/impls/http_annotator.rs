//! HttpAnnotator - reqwest による外部アノテーション API 呼び出し
//!
//! # 学習ポイント
//! - `reqwest::Client` は内部にコネクションプールを持つ。1 worker instance で
//!   1 つ作って全 attempt / 全 job で共有する
//! - request builder は attempt ごとに作って捨てる（attempt をまたいで再利用しない）
//! - エラーは投げずに `AttemptOutcome` に分類して返す

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

use crate::config::AnalyserConfig;
use crate::domain::{AnnotationRequest, AttemptOutcome, classify_response};
use crate::ports::Annotator;

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Error)]
pub enum HttpAnnotatorError {
    #[error("invalid endpoint `{url}`: {reason}")]
    Endpoint { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Annotator backed by the text-analytics HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAnnotator {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl HttpAnnotator {
    pub fn new(config: &AnalyserConfig) -> Result<Self, HttpAnnotatorError> {
        let endpoint = endpoint(&config.base_url, config.port, &config.url_path, config.tls)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Resolve the request URL.
///
/// A `base_url` with a scheme is used as given (its own port wins). A bare
/// host gets `https`/`http` from `tls` and the configured `port`.
pub fn endpoint(base_url: &str, port: u16, url_path: &str, tls: bool) -> Result<Url, HttpAnnotatorError> {
    let base = base_url.trim().trim_end_matches('/');
    let raw = if base.contains("://") {
        base.to_string()
    } else {
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{base}")
    };

    let invalid = |reason: String| HttpAnnotatorError::Endpoint {
        url: raw.clone(),
        reason,
    };

    let mut url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
    if !base.contains("://") && url.port_or_known_default() != Some(port) {
        url.set_port(Some(port))
            .map_err(|_| invalid(format!("cannot set port {port}")))?;
    }
    url.set_path(url_path);
    Ok(url)
}

#[async_trait]
impl Annotator for HttpAnnotator {
    async fn annotate(&self, request: &AnnotationRequest) -> AttemptOutcome {
        debug!(endpoint = %self.endpoint, document_id = ?request.document_id(), "calling annotation service");

        let sent = self
            .client
            .post(self.endpoint.clone())
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return AttemptOutcome::internal(format!("failed to build request: {e}"));
            }
            Err(e) => return AttemptOutcome::transient(format!("transport error: {e}")),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => classify_response(status, &body),
            Err(e) => AttemptOutcome::transient(format!("failed to read response body: {e}")),
        }
    }
}
