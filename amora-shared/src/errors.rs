use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Caller-visible error kinds. Stable across releases; every [`ErrorCode`]
/// belongs to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Forbidden,
    Conflict,
    RateLimited,
    Expired,
    InvalidContent,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument | Self::InvalidContent => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Expired => StatusCode::GONE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Expired => "expired",
            Self::InvalidContent => "invalid_content",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Application error codes following the pattern E{component}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Identity errors
/// - E3xxx: Swipe/match errors
/// - E4xxx: Conversation errors
/// - E5xxx: Ephemeral photo errors
/// - E6xxx: Moderation errors
/// - E7xxx: Block errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimited,
    ServiceUnavailable,
    Conflict,
    Timeout,
    RequestCancelled,
    RequestInFlight,

    // Identity (E1xxx)
    UserNotFound,
    UserBanned,
    UserInactive,
    MissingCapability,

    // Matching (E3xxx)
    CannotSwipeSelf,
    AlreadySwiped,
    Blocked,
    MatchNotFound,
    NotMatchParticipant,
    MatchInactive,
    MatchAlreadyActive,

    // Conversations (E4xxx)
    ConversationNotFound,
    NotConversationMember,
    InvalidContent,
    InvalidLocation,
    InvalidAttachment,
    SystemMessageForbidden,

    // Ephemeral photos (E5xxx)
    PhotoNotFound,
    PhotoExpired,
    OwnerCannotView,
    UnsupportedMediaType,
    PayloadTooLarge,
    InvalidPhotoDuration,
    PhotoViewNotFound,

    // Moderation (E6xxx)
    ReportNotFound,
    SanctionNotFound,
    ReportAlreadyReviewed,
    CannotReportSelf,
    DuplicateReport,
    InvalidDurationToken,
    SanctionAlreadyActive,
    SanctionNotActive,
    AppealNotFound,
    AppealAlreadyPending,
    AppealAlreadyReviewed,

    // Blocks (E7xxx)
    CannotBlockSelf,
    AlreadyBlocked,
    BlockNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::RateLimited => "E0006",
            Self::ServiceUnavailable => "E0007",
            Self::Conflict => "E0008",
            Self::Timeout => "E0009",
            Self::RequestCancelled => "E0010",
            Self::RequestInFlight => "E0011",

            // Identity
            Self::UserNotFound => "E1001",
            Self::UserBanned => "E1002",
            Self::UserInactive => "E1003",
            Self::MissingCapability => "E1004",

            // Matching
            Self::CannotSwipeSelf => "E3001",
            Self::AlreadySwiped => "E3002",
            Self::Blocked => "E3003",
            Self::MatchNotFound => "E3004",
            Self::NotMatchParticipant => "E3005",
            Self::MatchInactive => "E3006",
            Self::MatchAlreadyActive => "E3007",

            // Conversations
            Self::ConversationNotFound => "E4001",
            Self::NotConversationMember => "E4002",
            Self::InvalidContent => "E4003",
            Self::InvalidLocation => "E4004",
            Self::InvalidAttachment => "E4005",
            Self::SystemMessageForbidden => "E4006",

            // Ephemeral photos
            Self::PhotoNotFound => "E5001",
            Self::PhotoExpired => "E5002",
            Self::OwnerCannotView => "E5003",
            Self::UnsupportedMediaType => "E5004",
            Self::PayloadTooLarge => "E5005",
            Self::InvalidPhotoDuration => "E5006",
            Self::PhotoViewNotFound => "E5007",

            // Moderation
            Self::ReportNotFound => "E6001",
            Self::SanctionNotFound => "E6002",
            Self::ReportAlreadyReviewed => "E6003",
            Self::CannotReportSelf => "E6004",
            Self::DuplicateReport => "E6005",
            Self::InvalidDurationToken => "E6006",
            Self::SanctionAlreadyActive => "E6007",
            Self::SanctionNotActive => "E6008",
            Self::AppealNotFound => "E6009",
            Self::AppealAlreadyPending => "E6010",
            Self::AppealAlreadyReviewed => "E6011",

            // Blocks
            Self::CannotBlockSelf => "E7001",
            Self::AlreadyBlocked => "E7002",
            Self::BlockNotFound => "E7003",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InternalError | Self::ServiceUnavailable | Self::RequestCancelled => ErrorKind::Internal,
            Self::ValidationError | Self::CannotSwipeSelf | Self::InvalidLocation
            | Self::InvalidAttachment | Self::UnsupportedMediaType | Self::PayloadTooLarge
            | Self::InvalidPhotoDuration | Self::CannotReportSelf | Self::InvalidDurationToken
            | Self::CannotBlockSelf => ErrorKind::InvalidArgument,
            Self::NotFound | Self::UserNotFound | Self::MatchNotFound
            | Self::ConversationNotFound | Self::PhotoNotFound | Self::PhotoViewNotFound
            | Self::ReportNotFound | Self::SanctionNotFound | Self::AppealNotFound
            | Self::BlockNotFound => ErrorKind::NotFound,
            Self::Unauthorized | Self::Forbidden | Self::UserBanned | Self::UserInactive
            | Self::MissingCapability | Self::Blocked | Self::NotMatchParticipant
            | Self::MatchInactive | Self::NotConversationMember | Self::SystemMessageForbidden
            | Self::OwnerCannotView => ErrorKind::Forbidden,
            Self::Conflict | Self::RequestInFlight | Self::AlreadySwiped | Self::MatchAlreadyActive
            | Self::ReportAlreadyReviewed | Self::DuplicateReport | Self::SanctionAlreadyActive
            | Self::SanctionNotActive | Self::AppealAlreadyPending | Self::AppealAlreadyReviewed
            | Self::AlreadyBlocked => ErrorKind::Conflict,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::PhotoExpired => ErrorKind::Expired,
            Self::InvalidContent => ErrorKind::InvalidContent,
            Self::Timeout => ErrorKind::Timeout,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => self.kind().status_code(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Budget exhausted; `retry_after_secs` is surfaced as a `Retry-After` hint.
    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::with_details(
            ErrorCode::RateLimited,
            message,
            serde_json::json!({ "retry_after_secs": retry_after_secs }),
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Database(diesel::result::Error::NotFound) => ErrorCode::NotFound,
            AppError::Database(_) => ErrorCode::InternalError,
            AppError::Validation(_) => ErrorCode::ValidationError,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AppError::Known { code: ErrorCode::RateLimited, details: Some(d), .. } => {
                d.get("retry_after_secs").and_then(|v| v.as_u64())
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();

        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), code.kind(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", ErrorKind::Internal, "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", ErrorKind::NotFound, "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", ErrorKind::Internal, "database error"),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", ErrorKind::InvalidArgument, msg),
            ),
        };

        let mut response = (status, Json(error_response)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let codes = [
            ErrorCode::InternalError, ErrorCode::ValidationError, ErrorCode::NotFound,
            ErrorCode::Unauthorized, ErrorCode::Forbidden, ErrorCode::RateLimited,
            ErrorCode::ServiceUnavailable, ErrorCode::Conflict, ErrorCode::Timeout,
            ErrorCode::RequestCancelled, ErrorCode::RequestInFlight, ErrorCode::UserNotFound,
            ErrorCode::UserBanned, ErrorCode::UserInactive, ErrorCode::MissingCapability,
            ErrorCode::CannotSwipeSelf, ErrorCode::AlreadySwiped, ErrorCode::Blocked,
            ErrorCode::MatchNotFound, ErrorCode::NotMatchParticipant, ErrorCode::MatchInactive,
            ErrorCode::MatchAlreadyActive, ErrorCode::ConversationNotFound,
            ErrorCode::NotConversationMember, ErrorCode::InvalidContent, ErrorCode::InvalidLocation,
            ErrorCode::InvalidAttachment, ErrorCode::SystemMessageForbidden, ErrorCode::PhotoNotFound,
            ErrorCode::PhotoExpired, ErrorCode::OwnerCannotView, ErrorCode::UnsupportedMediaType,
            ErrorCode::PayloadTooLarge, ErrorCode::InvalidPhotoDuration, ErrorCode::PhotoViewNotFound,
            ErrorCode::ReportNotFound, ErrorCode::SanctionNotFound, ErrorCode::ReportAlreadyReviewed,
            ErrorCode::CannotReportSelf, ErrorCode::DuplicateReport, ErrorCode::InvalidDurationToken,
            ErrorCode::SanctionAlreadyActive, ErrorCode::SanctionNotActive, ErrorCode::AppealNotFound,
            ErrorCode::AppealAlreadyPending, ErrorCode::AppealAlreadyReviewed,
            ErrorCode::CannotBlockSelf, ErrorCode::AlreadyBlocked, ErrorCode::BlockNotFound,
        ];
        let mut seen = std::collections::HashSet::new();
        for c in codes {
            assert!(seen.insert(c.code()), "duplicate code {}", c.code());
        }
    }

    #[test]
    fn swipe_failures_map_to_expected_kinds() {
        assert_eq!(ErrorCode::AlreadySwiped.kind(), ErrorKind::Conflict);
        assert_eq!(ErrorCode::Blocked.kind(), ErrorKind::Forbidden);
        assert_eq!(ErrorCode::PhotoExpired.kind(), ErrorKind::Expired);
        assert_eq!(ErrorCode::InvalidDurationToken.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = AppError::rate_limited("slow down", 42);
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.retry_after_secs(), Some(42));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn database_not_found_is_not_found_kind() {
        let err = AppError::Database(diesel::result::Error::NotFound);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
