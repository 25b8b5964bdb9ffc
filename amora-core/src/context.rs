use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use amora_shared::{AppError, AppResult, ErrorCode};

use crate::config::CoreConfig;
use crate::events::EventEnvelope;
use crate::model::{Capability, User};
use crate::ports::*;
use crate::store::Store;

/// Capability set every command runs against.
#[derive(Clone)]
pub struct Core {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub limiter: Arc<dyn RateLimiter>,
    pub notifier: Arc<dyn Notifier>,
    pub events: Arc<dyn EventSink>,
    pub signer: Arc<dyn StorageSigner>,
    pub classifier: Arc<dyn ContentClassifier>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<CoreConfig>,
}

/// Per-request context: cancellation signal and optional idempotency key.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub cancel: CancellationToken,
    pub idempotency_key: Option<String>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel, idempotency_key: None }
    }

    pub fn idempotent(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Called immediately before a commit. After the commit the write stands
    /// regardless of cancellation.
    pub fn checkpoint(&self) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::new(ErrorCode::RequestCancelled, "request cancelled"));
        }
        Ok(())
    }

    /// Race a pre-commit suspension point against cancellation.
    pub async fn guard<T, F>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::new(ErrorCode::RequestCancelled, "request cancelled")),
            res = fut => res,
        }
    }
}

impl Core {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn cache_budget(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.cache)
    }

    pub fn storage_budget(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.storage)
    }

    pub fn classifier_budget(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.classifier)
    }

    pub async fn require_user(&self, id: Uuid) -> AppResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, format!("user {id} not found")))
    }

    /// Load an account and ensure it may perform writes.
    pub async fn require_actor(&self, id: Uuid) -> AppResult<User> {
        let user = self.require_user(id).await?;
        user.ensure_can_act()?;
        Ok(user)
    }

    pub async fn require_capability(&self, id: Uuid, capability: Capability) -> AppResult<User> {
        let user = self.require_user(id).await?;
        if user.is_banned || !capability.held_by(&user.capabilities) {
            return Err(AppError::with_details(
                ErrorCode::MissingCapability,
                format!("missing capability {capability}"),
                serde_json::json!({ "capability": capability.as_str() }),
            ));
        }
        Ok(user)
    }

    /// Publish after commit. Broker failures are logged, never surfaced.
    pub async fn emit(&self, envelope: EventEnvelope) {
        if let Err(e) = self.events.publish(&envelope).await {
            tracing::error!(
                error = %e,
                routing_key = envelope.routing_key,
                event_id = %envelope.event.id,
                "failed to publish event"
            );
        }
    }

    pub async fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value) {
        if let Err(e) = self.notifier.notify(user_id, kind, payload).await {
            tracing::warn!(error = %e, user_id = %user_id, kind, "notification failed");
        }
    }

    pub async fn cache_get(&self, key: &str) -> Option<String> {
        match with_timeout(self.cache_budget(), self.cache.get(key)).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, key, "cache get failed");
                None
            }
        }
    }

    pub async fn cache_set(&self, key: &str, value: &str, ttl_secs: u64) {
        if let Err(e) = with_timeout(self.cache_budget(), self.cache.set(key, value, ttl_secs)).await {
            tracing::warn!(error = %e, key, "cache set failed");
        }
    }

    pub async fn cache_delete(&self, key: &str) {
        if let Err(e) = with_timeout(self.cache_budget(), self.cache.delete(key)).await {
            tracing::warn!(error = %e, key, "cache delete failed");
        }
    }

    pub(crate) async fn cache_set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, PortError> {
        with_timeout(self.cache_budget(), self.cache.set_if_absent(key, value, ttl_secs)).await
    }

    /// Check every `(budget, window)` pair. Budget `0` disables a window.
    /// A failing limiter admits the request.
    pub async fn enforce_rate_limit(
        &self,
        bucket: &str,
        subject: &str,
        windows: &[(u64, Duration)],
    ) -> AppResult<()> {
        for (budget, window) in windows.iter().copied().filter(|(b, _)| *b > 0) {
            let decision = with_timeout(
                self.cache_budget(),
                self.limiter.check(bucket, subject, budget, window),
            )
            .await;

            match decision {
                Ok(RateDecision::Allowed) => {}
                Ok(RateDecision::Denied { retry_after_secs }) => {
                    tracing::info!(bucket, subject, budget, window_secs = window.as_secs(), "rate limited");
                    return Err(AppError::rate_limited(
                        format!("{bucket} limit of {budget} per {}s exceeded", window.as_secs()),
                        retry_after_secs,
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, bucket, subject, "rate limiter unavailable; admitting request");
                }
            }
        }
        Ok(())
    }
}

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(3600);
pub const DAY: Duration = Duration::from_secs(86_400);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_fails_once_cancelled() {
        let cx = OpContext::new();
        assert!(cx.checkpoint().is_ok());
        cx.cancel.cancel();
        assert_eq!(cx.checkpoint().unwrap_err().code(), ErrorCode::RequestCancelled);
    }

    #[tokio::test]
    async fn guard_short_circuits_on_cancel() {
        let cx = OpContext::new();
        cx.cancel.cancel();
        let res: AppResult<()> = cx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(res.unwrap_err().code(), ErrorCode::RequestCancelled);
    }
}
