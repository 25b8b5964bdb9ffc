pub mod blocks;
pub mod conversations;
pub mod ephemeral;
pub mod health;
pub mod identity;
pub mod moderation;
pub mod swipes;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use validator::Validate;

use amora_core::OpContext;
use amora_shared::{AppError, ErrorCode};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Per-request [`OpContext`], carrying the caller's `Idempotency-Key` when sent.
pub struct RequestContext(pub OpContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(op_context(&parts.headers)?))
    }
}

pub fn op_context(headers: &HeaderMap) -> Result<OpContext, AppError> {
    let cx = OpContext::new();
    let Some(raw) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(cx);
    };
    let key = raw
        .to_str()
        .map_err(|_| AppError::invalid_argument("idempotency key must be visible ASCII"))?
        .trim();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::invalid_argument(format!(
            "idempotency key must be 1..={MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(cx.idempotent(key))
}

pub fn validate<T: Validate>(req: &T) -> Result<(), AppError> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_means_no_key() {
        let cx = op_context(&HeaderMap::new()).unwrap();
        assert!(cx.idempotency_key.is_none());
    }

    #[test]
    fn header_is_trimmed_and_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static(" swipe-42 "));
        let cx = op_context(&headers).unwrap();
        assert_eq!(cx.idempotency_key.as_deref(), Some("swipe-42"));
    }

    #[test]
    fn oversized_key_is_rejected() {
        let mut headers = HeaderMap::new();
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_str(&long).unwrap());
        assert!(op_context(&headers).is_err());
    }
}
