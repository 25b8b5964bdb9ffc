use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

use amora_shared::{AppError, ErrorCode};

/// Sanction length parsed from a duration token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionDuration {
    Permanent,
    Finite(Duration),
}

/// Accepted tokens, in the order they are documented to moderators.
pub const DURATION_TOKENS: &[&str] = &["permanent", "1h", "24h", "7d", "30d", "90d", "1y"];

impl SanctionDuration {
    pub fn parse(token: &str) -> Result<Self, AppError> {
        let parsed = match token.trim() {
            "permanent" => Self::Permanent,
            "1h" => Self::Finite(Duration::hours(1)),
            "24h" => Self::Finite(Duration::hours(24)),
            "7d" => Self::Finite(Duration::days(7)),
            "30d" => Self::Finite(Duration::days(30)),
            "90d" => Self::Finite(Duration::days(90)),
            "1y" => Self::Finite(Duration::days(365)),
            other => {
                return Err(AppError::with_details(
                    ErrorCode::InvalidDurationToken,
                    format!("unknown duration token: {other}"),
                    serde_json::json!({ "accepted": DURATION_TOKENS }),
                ))
            }
        };
        Ok(parsed)
    }

    /// Parse an optional token; absence means permanent.
    pub fn parse_opt(token: Option<&str>) -> Result<Self, AppError> {
        token.map_or(Ok(Self::Permanent), Self::parse)
    }

    /// `None` for permanent sanctions.
    pub fn expires_at(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Permanent => None,
            Self::Finite(d) => Some(from + *d),
        }
    }

    pub fn token(&self) -> String {
        match self {
            Self::Permanent => "permanent".into(),
            Self::Finite(d) => {
                let hours = d.num_hours();
                match hours {
                    1 | 24 => format!("{hours}h"),
                    h if h == 365 * 24 => "1y".into(),
                    h => format!("{}d", h / 24),
                }
            }
        }
    }
}

impl FromStr for SanctionDuration {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SanctionDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}
