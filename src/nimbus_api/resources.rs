use crate::nimbus_api::url::UrlBuilder;
use serde::{Deserialize, Serialize};

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: PaginationLinks,
    pub meta: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn has_next(&self) -> bool {
        self.links.next.is_some() || self.meta.current_page < self.meta.last_page
    }
}

/// Pagination links
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationLinks {
    pub first: Option<String>,
    pub last: Option<String>,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub current_page: u32,
    pub last_page: u32,
    pub per_page: u32,
    pub total: u32,
}

/// Single resource response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResponse<T> {
    pub data: T,
}

/// Paging and filtering for list endpoints
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Extra `key=value` filters passed through as query parameters
    pub filters: Vec<(String, String)>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub(crate) fn apply<'a>(&self, builder: UrlBuilder<'a>) -> UrlBuilder<'a> {
        let mut builder = builder
            .query_opt("page", self.page)
            .query_opt("per_page", self.per_page);
        for (key, value) in &self.filters {
            builder = builder.query(key.clone(), value);
        }
        builder
    }
}

/// Acknowledgement body returned by delete and fire-and-forget endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}
