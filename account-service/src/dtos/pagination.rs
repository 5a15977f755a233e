use serde::{Deserialize, Serialize};

use crate::store::Page;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;

/// `page` is 1-based; `offset` is the page size.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub offset: Option<u64>,
}

impl PaginationParams {
    pub fn page(&self) -> u64 {
        self.page.filter(|p| *p > 0).unwrap_or(1)
    }

    pub fn page_size(&self) -> u64 {
        self.offset
            .filter(|o| *o > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    pub fn skip(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.page_size())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u64,
    pub page_size: u64,
    pub page_count: u64,
    pub total: u64,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

impl PaginationMeta {
    pub fn new(params: &PaginationParams, total: u64) -> Self {
        let page = params.page();
        let page_size = params.page_size();
        let page_count = total.div_ceil(page_size);
        Self {
            page,
            page_size,
            page_count,
            total,
            has_previous_page: page > 1,
            has_next_page: page < page_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub pagination: PaginationMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: ResponseMeta,
}

impl<T> Paginated<T> {
    pub fn from_page(page: Page<T>, params: &PaginationParams) -> Self {
        Self {
            meta: ResponseMeta {
                pagination: PaginationMeta::new(params, page.count),
            },
            data: page.data,
        }
    }
}
