use serde::{Deserialize, Serialize};

use super::TimeRange;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Paginated series request, sorted on `captured_at`.
#[derive(Debug, Clone, Copy)]
pub struct PageQuery {
    pub page: u32,
    pub limit: u32,
    pub sort_order: SortOrder,
    pub range: TimeRange,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            sort_order: SortOrder::Desc,
            range: TimeRange::unbounded(),
        }
    }
}

impl PageQuery {
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.max(1)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PaginationInfo {
    pub fn new(query: &PageQuery, total_items: u64) -> Self {
        let current_page = query.page();
        let items_per_page = query.limit();
        let total_pages = total_items.div_ceil(u64::from(items_per_page));

        Self {
            current_page,
            total_pages,
            total_items,
            items_per_page,
            has_next_page: u64::from(current_page) < total_pages,
            has_prev_page: current_page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PaginationInfo,
}
