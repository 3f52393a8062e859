//! Pagination and ordering for list queries.

use serde::{Deserialize, Serialize};

/// Hard cap on page size. Requests above this are clamped, not rejected.
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Default page size when the caller does not specify one.
const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl SortOrder {
    /// SQL keyword for the direction.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Bounded pagination window.
///
/// Every list query takes one of these; there is no unpaginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Rows to skip.
    pub offset: u64,
    /// Rows to return, clamped to [`MAX_PAGE_LIMIT`].
    pub limit: u32,
    /// Sort direction on the query's natural ordering column.
    pub order: SortOrder,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
            order: SortOrder::default(),
        }
    }
}

impl Page {
    /// Creates a page with the default ordering.
    #[must_use]
    pub fn new(offset: u64, limit: u32) -> Self {
        Self {
            offset,
            limit,
            order: SortOrder::default(),
        }
    }

    /// Sets the sort direction.
    #[must_use]
    pub const fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// The limit actually applied: at least 1, at most [`MAX_PAGE_LIMIT`].
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// Stable string form, used in list cache keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "o={};l={};s={}",
            self.offset,
            self.effective_limit(),
            self.order.as_sql()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit_clamps() {
        assert_eq!(Page::new(0, 0).effective_limit(), 1);
        assert_eq!(Page::new(0, 50).effective_limit(), 50);
        assert_eq!(Page::new(0, 9999).effective_limit(), MAX_PAGE_LIMIT);
    }

    #[test]
    fn test_canonical_reflects_clamping() {
        assert_eq!(Page::new(10, 9999).canonical(), "o=10;l=500;s=DESC");
    }
}
