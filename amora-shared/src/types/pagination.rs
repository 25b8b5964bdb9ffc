use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 { 1 }
fn default_per_page() -> u64 { 20 }

impl PaginationParams {
    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1)) * self.limit()
    }

    pub fn limit(&self) -> u64 {
        self.per_page.clamp(1, 100)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 20 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, params: &PaginationParams) -> Self {
        let per_page = params.limit();
        let total_pages = if total == 0 { 0 } else { (total + per_page - 1) / per_page };
        Self {
            items,
            total,
            page: params.page,
            per_page,
            total_pages,
        }
    }
}

/// Time cursor over an append-only log.
///
/// `before` pages backwards (newest first); `after` catches up forwards
/// (oldest first). When both are absent the newest page is returned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CursorParams {
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    #[serde(default = "default_per_page")]
    pub limit: u64,
}

impl CursorParams {
    pub fn before(ts: DateTime<Utc>, limit: u64) -> Self {
        Self { before: Some(ts), after: None, limit }
    }

    pub fn after(ts: DateTime<Utc>, limit: u64) -> Self {
        Self { before: None, after: Some(ts), limit }
    }

    pub fn latest(limit: u64) -> Self {
        Self { before: None, after: None, limit }
    }

    pub fn capped_limit(&self) -> u64 {
        self.limit.clamp(1, 100)
    }

    /// Forward (ascending) iteration is used only for live catch-up.
    pub fn is_forward(&self) -> bool {
        self.after.is_some() && self.before.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_uses_capped_page_size() {
        let params = PaginationParams { page: 3, per_page: 500 };
        assert_eq!(params.limit(), 100);
        assert_eq!(params.offset(), 200);
    }

    #[test]
    fn paginated_rounds_pages_up() {
        let params = PaginationParams { page: 1, per_page: 20 };
        let page = Paginated::new(vec![1, 2, 3], 41, &params);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn cursor_direction() {
        let now = Utc::now();
        assert!(CursorParams::after(now, 10).is_forward());
        assert!(!CursorParams::before(now, 10).is_forward());
        assert!(!CursorParams::latest(10).is_forward());
        assert_eq!(CursorParams::latest(0).capped_limit(), 1);
    }
}
