//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type パターンで型ごとに分けています。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 調整なしで複数ノード（複数 worker instance）で生成できる
//!
//! ## Wire format
//! バス上では prefix なしの ULID 文字列として運ぶ（`"01J..."`）。
//! Display だけが prefix 付き（`req-01J...`）で、ログ用。
//!
//! ## JobId は例外
//! Job の id は呼び出し側が付ける opaque な文字列（UUID など何でもよい）。
//! ULID はこちらで生成するときの形式にすぎず、受信時には要求しない。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"req-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しませんが、
/// コンパイル時に型安全性を提供します。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 新しい ID を生成
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Prefix-less form used on the wire and as the outbound document id.
    pub fn to_wire(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Accepts both the wire form and the prefixed display form.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Bus request のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Request {}

impl IdMarker for Request {
    fn prefix() -> &'static str {
        "req-"
    }
}

/// Identifier of a Job. Stable across every retry of that job.
///
/// Opaque: any non-empty string a producer assigns is accepted on the wire.
/// Ids generated here are ULID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job id must not be empty")]
pub struct EmptyJobId;

impl JobId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = EmptyJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(EmptyJobId);
        }
        Ok(Self(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of one inbound bus request (one request/reply exchange).
pub type RequestId = Id<Request>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_display_with_prefix() {
        let request = RequestId::generate();
        assert!(request.to_string().starts_with("req-"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(JobId::generate(), JobId::generate());
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn generated_job_ids_are_ulids() {
        let job_id = JobId::generate();
        assert!(Ulid::from_string(job_id.as_str()).is_ok());
    }

    #[test]
    fn request_ids_serialize_as_plain_ulid_strings() {
        let request_id = RequestId::generate();

        let value = serde_json::to_value(request_id).unwrap();
        assert_eq!(value, serde_json::Value::String(request_id.as_ulid().to_string()));

        let back: RequestId = serde_json::from_value(value).unwrap();
        assert_eq!(back, request_id);
    }

    #[test]
    fn request_id_parse_accepts_prefixed_and_wire_forms() {
        let request_id = RequestId::generate();

        let from_display: RequestId = request_id.to_string().parse().unwrap();
        let from_wire: RequestId = request_id.to_wire().parse().unwrap();

        assert_eq!(from_display, request_id);
        assert_eq!(from_wire, request_id);
        assert!("req-not-a-ulid".parse::<RequestId>().is_err());
    }

    #[test]
    fn job_ids_from_other_producers_are_kept_verbatim() {
        let uuid = "3f2b8c1e-9d4a-4e6b-8f1a-2c3d4e5f6a7b";

        let job_id: JobId = serde_json::from_value(serde_json::json!(uuid)).unwrap();
        assert_eq!(job_id.as_str(), uuid);
        assert_eq!(job_id.to_string(), uuid);
        assert_eq!(serde_json::to_value(&job_id).unwrap(), serde_json::json!(uuid));
    }

    #[test]
    fn empty_job_id_is_rejected() {
        assert!(serde_json::from_value::<JobId>(serde_json::json!("")).is_err());
        assert!(serde_json::from_value::<JobId>(serde_json::json!("  ")).is_err());
        assert!(serde_json::from_value::<JobId>(serde_json::json!(42)).is_err());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<RequestId>(), size_of::<Ulid>());
    }
}
