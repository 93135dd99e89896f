use chrono::{DateTime, Utc};

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Listing direction over `(created_at, row_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Parse the request parameter; empty selects the default descending
    /// order.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.to_lowercase().as_str() {
            "" | "desc" => Ok(SortOrder::Desc),
            "asc" => Ok(SortOrder::Asc),
            _ => Err(AppError::Validation(
                "order must be one of 'asc' or 'desc'".to_string(),
            )),
        }
    }

    /// Comparison operator selecting rows strictly beyond the cursor.
    pub fn beyond_operator(self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }

    pub fn sql_keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Validated pagination parameters.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub limit: i64,
    pub order: SortOrder,
    /// External id of a previously seen row; resolution to its
    /// `(created_at, row_id)` pair happens in the listing operation.
    pub after: Option<String>,
}

impl PageRequest {
    pub fn new(limit: i64, order: &str, after: Option<String>) -> Result<Self, AppError> {
        Ok(PageRequest {
            limit: clamp_limit(limit)?,
            order: SortOrder::parse(order)?,
            after: after.filter(|id| !id.is_empty()),
        })
    }

}

/// Clamp a requested page size into [1, MAX_PAGE_SIZE]; zero selects the
/// default, negative values are rejected before any query runs.
pub fn clamp_limit(limit: i64) -> Result<i64, AppError> {
    if limit < 0 {
        return Err(AppError::Validation("limit must be non-negative".to_string()));
    }
    if limit == 0 {
        return Ok(DEFAULT_PAGE_SIZE);
    }
    Ok(limit.min(MAX_PAGE_SIZE))
}

/// The `(created_at, row_id)` pair of the cursor row. The row id breaks ties
/// between rows created in the same instant, giving a total order.
#[derive(Debug, Clone, Copy)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub row_id: i64,
}

/// One page of results plus the bookkeeping the request surface reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub first_id: String,
    pub last_id: String,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Assemble a page from a `limit + 1` overfetch: the extra row is
    /// dropped and only signals that more rows exist.
    pub fn from_rows(mut rows: Vec<T>, limit: usize, id_of: impl Fn(&T) -> String) -> Self {
        let has_more = rows.len() > limit;
        if has_more {
            rows.truncate(limit);
        }
        let first_id = rows.first().map(&id_of).unwrap_or_default();
        let last_id = rows.last().map(&id_of).unwrap_or_default();
        Page {
            data: rows,
            first_id,
            last_id,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            first_id: self.first_id,
            last_id: self.last_id,
            has_more: self.has_more,
        }
    }
}
