//! Narrow interfaces to the collaborators the core consumes.
//!
//! Every port may fail. Callers decide whether a failure is swallowed
//! (cache, notifications, events) or surfaced (storage signing).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use amora_shared::clients::classifier::ClassifierVerdict;
use amora_shared::{AppError, ErrorCode};

use crate::events::EventEnvelope;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("operation timed out")]
    Timeout,
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl From<PortError> for AppError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Timeout => AppError::timeout("downstream did not respond in time"),
            PortError::Unavailable(msg) => AppError::new(ErrorCode::ServiceUnavailable, msg),
        }
    }
}

/// Bound a port call. Elapsed budgets surface as [`PortError::Timeout`].
pub async fn with_timeout<T, F>(budget: Duration, fut: F) -> Result<T, PortError>
where
    F: Future<Output = Result<T, PortError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(res) => res,
        Err(_) => Err(PortError::Timeout),
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PortError>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), PortError>;
    async fn delete(&self, key: &str) -> Result<(), PortError>;
    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, PortError>;
    /// Set only when absent. Used for leases and idempotency markers.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, PortError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Sliding-window check that records the hit when allowed.
    async fn check(
        &self,
        bucket: &str,
        subject: &str,
        budget: u64,
        window: Duration,
    ) -> Result<RateDecision, PortError>;
}

/// Best-effort user notification. Failures never fail the originating write.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value) -> Result<(), PortError>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PortError>;
}

#[async_trait]
pub trait StorageSigner: Send + Sync {
    async fn sign_upload(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        expiry: Duration,
    ) -> Result<String, PortError>;
    async fn sign_download(&self, key: &str, expiry: Duration) -> Result<String, PortError>;
    async fn delete_object(&self, key: &str) -> Result<(), PortError>;
}

#[async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn classify_text(&self, text: &str) -> Result<ClassifierVerdict, PortError>;
    async fn classify_image(&self, object_key: &str) -> Result<ClassifierVerdict, PortError>;
}

/// Profile photos owned by the profile service. Only approval is consulted.
#[async_trait]
pub trait PhotoCatalog: Send + Sync {
    async fn is_owned_approved(&self, owner_id: Uuid, photo_id: Uuid) -> Result<bool, PortError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
