//! Reports, sanctions and appeals.
//!
//! Every administrative decision writes an `admin_actions` row in the same
//! transaction as its effect.

pub mod appeals;
pub mod reports;
pub mod rules;
pub mod sanctions;

use amora_shared::AppError;

/// Free-text fields moderators and users submit are bounded.
pub(crate) const MAX_TEXT: usize = 2000;

pub(crate) fn required_text(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_argument(format!("{field} is required")));
    }
    optional_text(field, Some(trimmed)).map(|v| v.unwrap_or_default())
}

pub(crate) fn optional_text(field: &str, value: Option<&str>) -> Result<Option<String>, AppError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) if v.chars().count() > MAX_TEXT => {
            Err(AppError::invalid_argument(format!("{field} exceeds {MAX_TEXT} characters")))
        }
        other => Ok(other.map(str::to_string)),
    }
}
