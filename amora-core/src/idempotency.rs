//! Caller-keyed replay protection for commands that create records.
//!
//! The first completed result is cached under `idem:<user>:<op>:<key>`;
//! replays return it unchanged. A replay racing the original fails with
//! `RequestInFlight`.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use amora_shared::{AppError, AppResult, ErrorCode};

use crate::context::{Core, OpContext};

const IN_FLIGHT: &str = "__in_flight__";

pub fn cache_key(user: Uuid, op: &str, key: &str) -> String {
    format!("idem:{user}:{op}:{key}")
}

/// `work` is only polled when no earlier result exists for the key.
pub async fn run_once<T, Fut>(core: &Core, cx: &OpContext, user: Uuid, op: &str, work: Fut) -> AppResult<T>
where
    T: Serialize + DeserializeOwned,
    Fut: Future<Output = AppResult<T>>,
{
    let Some(idem_key) = cx.idempotency_key.as_deref() else {
        return work.await;
    };
    let key = cache_key(user, op, idem_key);
    let cfg = &core.config.idempotency;

    match core.cache_set_if_absent(&key, IN_FLIGHT, cfg.in_flight_ttl).await {
        Ok(true) => {}
        Ok(false) => return replay(core, &key).await,
        Err(e) => {
            tracing::warn!(
                error = %e,
                key = %key,
                "idempotency store unavailable; executing without replay protection"
            );
            return work.await;
        }
    }

    match work.await {
        Ok(value) => {
            match serde_json::to_string(&value) {
                Ok(json) => core.cache_set(&key, &json, cfg.ttl).await,
                Err(e) => {
                    tracing::error!(error = %e, key = %key, "failed to serialize idempotent result");
                    core.cache_delete(&key).await;
                }
            }
            Ok(value)
        }
        Err(err) => {
            core.cache_delete(&key).await;
            Err(err)
        }
    }
}

async fn replay<T: DeserializeOwned>(core: &Core, key: &str) -> AppResult<T> {
    match core.cache_get(key).await.as_deref() {
        Some(IN_FLIGHT) | None => Err(AppError::new(
            ErrorCode::RequestInFlight,
            "a request with this idempotency key is still in flight",
        )),
        Some(json) => {
            tracing::debug!(key, "replaying idempotent result");
            serde_json::from_str(json).map_err(|e| {
                tracing::error!(error = %e, key, "corrupt idempotency record");
                AppError::Internal(e.into())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_per_user_and_operation() {
        let a = cache_key(Uuid::from_u128(1), "record_swipe", "k");
        let b = cache_key(Uuid::from_u128(2), "record_swipe", "k");
        let c = cache_key(Uuid::from_u128(1), "submit_report", "k");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("idem:"));
    }
}
