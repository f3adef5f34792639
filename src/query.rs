//! The query value space (§6) and the generic [`Query`] builder (§4.10).
//!
//! A `Query` is backend-agnostic: it carries filters, ordering, and an
//! optional pagination window. Concrete backends interpret it however
//! fits their storage; this crate never executes a query itself.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Comparison/membership operators available to a [`Filter`] (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    IsNull,
    IsNotNull,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
    Contains,
    StartsWith,
    EndsWith,
}

/// A single filter predicate on a named field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    /// Absent for `IsNull`/`IsNotNull`, which need no operand.
    pub value: Option<JsonValue>,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: Operator, value: JsonValue) -> Self {
        Self { field: field.into(), op, value: Some(value) }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self { field: field.into(), op: Operator::IsNull, value: None }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self { field: field.into(), op: Operator::IsNotNull, value: None }
    }
}

/// Ordering clause: field plus direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSpec {
    pub field: String,
    pub descending: bool,
}

/// Forward or backward pagination window (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub first: Option<u32>,
    pub after: Option<String>,
    pub last: Option<u32>,
    pub before: Option<String>,
}

/// A backend-agnostic query: filters, ordering, and an optional page
/// window. Generic over nothing — queries are untyped at this boundary
/// (§4.10); callers supply an `accessor` closure where a typed view is
/// needed (e.g. `invalidate_where`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderSpec>,
    pub page: Option<Pagination>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderSpec { field: field.into(), descending });
        self
    }

    pub fn paginate(mut self, page: Pagination) -> Self {
        self.page = Some(page);
        self
    }
}

/// Page metadata returned alongside a [`PagedResult`] (§6).
///
/// Invariant: `end_cursor` is `Some` iff `has_next_page` is `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub total_count: Option<u64>,
}

impl PageInfo {
    /// A page-info describing a single, complete (non-paginated) result.
    pub fn complete(total_count: u64) -> Self {
        Self {
            has_next_page: false,
            has_previous_page: false,
            start_cursor: None,
            end_cursor: None,
            total_count: Some(total_count),
        }
    }
}

/// A single page of query results.
#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}
