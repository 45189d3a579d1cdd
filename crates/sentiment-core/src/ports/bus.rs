//! Bus port - 位置透過な request/reply バス
//!
//! 呼び出し側は論理アドレスだけを知っていればよく、どのインスタンスが
//! 処理するかは知らない。
//!
//! # 学習ポイント
//! - `Delivery` は reply/fail で消費される（所有権で「返信は 1 回」を保証）
//! - 返信せずに drop された場合は Drop で internal fault を返す（返信 0 回も防ぐ）

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

use crate::domain::codes;
use crate::domain::ids::RequestId;

/// Failure reply: a code plus a message, with optional structured detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("failure {code}: {message}")]
pub struct Failure {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl Failure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

pub type Reply = Result<serde_json::Value, Failure>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no handlers registered for address `{address}`")]
    NoHandlers { address: String },

    #[error("no reply from `{address}` within {after:?}")]
    Timeout { address: String, after: Duration },

    #[error(transparent)]
    Failure(#[from] Failure),

    #[error("bus closed: {0}")]
    Closed(String),
}

/// An inbound request waiting for its single reply.
#[derive(Debug)]
pub struct Delivery {
    id: RequestId,
    address: String,
    body: serde_json::Value,
    reply: Option<oneshot::Sender<Reply>>,
}

impl Delivery {
    /// Create a delivery and the receiving end of its reply.
    pub fn new(address: impl Into<String>, body: serde_json::Value) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let delivery = Self {
            id: RequestId::generate(),
            address: address.into(),
            body,
            reply: Some(tx),
        };
        (delivery, rx)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Take the body out. The delivery still owes its reply.
    pub fn take_body(&mut self) -> serde_json::Value {
        std::mem::take(&mut self.body)
    }

    pub fn reply(mut self, body: serde_json::Value) {
        self.send(Ok(body));
    }

    pub fn fail(mut self, failure: Failure) {
        self.send(Err(failure));
    }

    fn send(&mut self, reply: Reply) {
        if let Some(tx) = self.reply.take() {
            // The requester may have given up waiting; nothing to do then.
            let _ = tx.send(reply);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.reply.is_some() {
            tracing::warn!(request_id = %self.id, address = %self.address, "delivery dropped without reply");
            self.send(Err(Failure::new(
                codes::INTERNAL_FAULT,
                "request dropped without a reply",
            )));
        }
    }
}

/// One registration at an address. Several consumers on the same address
/// compete for deliveries.
#[async_trait]
pub trait Consumer: Send {
    fn address(&self) -> &str;

    /// Next delivery, or `None` once the address is closed.
    async fn next(&mut self) -> Option<Delivery>;

    /// Remove this registration. Returns once the bus has acknowledged it.
    async fn unregister(self: Box<Self>) -> Result<(), BusError>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn consumer(&self, address: &str) -> Result<Box<dyn Consumer>, BusError>;

    /// Send `body` to one consumer at `address` and wait for its reply.
    async fn request(
        &self,
        address: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError>;

    /// Fire-and-forget broadcast to every subscriber of `topic`.
    fn publish(&self, topic: &str, body: serde_json::Value);

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reply_is_delivered_once() {
        let (delivery, rx) = Delivery::new("addr", json!({ "n": 1 }));
        assert_eq!(delivery.body()["n"], 1);

        delivery.reply(json!({ "ok": true }));
        assert_eq!(rx.await.unwrap(), Ok(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn fail_carries_code_and_message() {
        let (delivery, rx) = Delivery::new("addr", json!({}));
        delivery.fail(Failure::new(2, "bad"));

        let failure = rx.await.unwrap().unwrap_err();
        assert_eq!(failure.code, 2);
        assert_eq!(failure.message, "bad");
    }

    #[tokio::test]
    async fn dropped_delivery_answers_with_internal_fault() {
        let (delivery, rx) = Delivery::new("addr", json!({}));
        drop(delivery);

        let failure = rx.await.unwrap().unwrap_err();
        assert_eq!(failure.code, codes::INTERNAL_FAULT);
    }
}
