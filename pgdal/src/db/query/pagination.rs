//! Page-based pagination.
//!
//! Pagination is advisory: out-of-range inputs are normalized, never rejected.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }
    }

    /// Clamp `page` to at least 1 and replace a non-positive `limit` with the default.
    pub fn normalized(self) -> Self {
        Self {
            page: if self.page < 1 { DEFAULT_PAGE } else { self.page },
            limit: if self.limit < 1 { DEFAULT_LIMIT } else { self.limit },
        }
    }

    /// Rows to skip, computed on the normalized values.
    pub fn offset(&self) -> i64 {
        let p = self.normalized();
        (p.page - 1).saturating_mul(p.limit)
    }
}

/// Pagination metadata returned alongside a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub total_pages: i64,
    pub total_items: i64,
    pub page: i64,
    pub limit: i64,
}

impl PageInfo {
    pub fn new(total_items: i64, page: i64, limit: i64) -> Self {
        let p = Pagination::new(page, limit).normalized();
        let total_items = total_items.max(0);
        Self {
            total_pages: total_items / p.limit + i64::from(total_items % p.limit != 0),
            total_items,
            page: p.page,
            limit: p.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_follows_page_and_limit() {
        assert_eq!(Pagination::new(3, 10).offset(), 20);
        assert_eq!(Pagination::new(1, 25).offset(), 0);
    }

    #[test]
    fn invalid_values_are_normalized() {
        assert_eq!(Pagination::new(0, 0).normalized(), Pagination::new(1, 10));
        assert_eq!(Pagination::new(-4, 5).normalized(), Pagination::new(1, 5));
        assert_eq!(Pagination::new(0, 10).offset(), 0);
    }

    #[test]
    fn page_info_rounds_total_pages_up() {
        let info = PageInfo::new(21, 2, 10);
        assert_eq!(info.total_pages, 3);
        assert_eq!(info.total_items, 21);
        assert_eq!(PageInfo::new(0, 1, 10).total_pages, 0);
        assert_eq!(PageInfo::new(20, 0, 0).total_pages, 2);
    }

    #[test]
    fn extreme_inputs_do_not_overflow() {
        assert_eq!(PageInfo::new(5, 1, i64::MAX).total_pages, 1);
        assert_eq!(PageInfo::new(i64::MAX, 1, 2).total_pages, i64::MAX / 2 + 1);
        assert_eq!(PageInfo::new(i64::MAX, 1, i64::MAX).total_pages, 1);
        assert_eq!(Pagination::new(i64::MAX, i64::MAX).offset(), i64::MAX);
    }
}
