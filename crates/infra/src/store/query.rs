//! Movement Log query types for audit screens and reconciliation.
//!
//! Queries are read-only and paginated by default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, ProductId, WarehouseId};
use stockledger_inventory::{DocumentRef, MovementType, StockMovement};

/// Half-open time window: `from <= created_at < to`. Either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn until(to: DateTime<Utc>) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }
}

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    /// 0-based.
    pub offset: u32,
}

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// The same page with `limit` held to [`MAX_PAGE_SIZE`]. Backends apply
    /// this, so a hand-built `Pagination` cannot exceed the cap.
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.min(MAX_PAGE_SIZE),
            offset: self.offset,
        }
    }
}

/// Filter criteria for the audit query. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub location_id: Option<LocationId>,
    /// Any of these types; empty means all.
    pub movement_types: Vec<MovementType>,
    pub date_range: Option<DateRange>,
    pub reference: Option<DocumentRef>,
}

impl MovementFilter {
    pub fn matches(&self, m: &StockMovement) -> bool {
        self.product_id.is_none_or(|p| m.product_id == p)
            && self.warehouse_id.is_none_or(|w| m.warehouse_id == w)
            && self.location_id.is_none_or(|l| m.location_id == Some(l))
            && (self.movement_types.is_empty() || self.movement_types.contains(&m.movement_type))
            && self.date_range.is_none_or(|r| r.contains(m.created_at))
            && self
                .reference
                .as_ref()
                .is_none_or(|r| m.reference.as_ref() == Some(r))
    }
}

/// One page of movements, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementPage {
    pub movements: Vec<StockMovement>,
    /// Matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl MovementPage {
    /// Sort `matched` newest first and cut out the requested page.
    pub(crate) fn paginate(mut matched: Vec<StockMovement>, pagination: Pagination) -> Self {
        let pagination = pagination.clamped();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let total = matched.len() as u64;
        let start = (pagination.offset as usize).min(matched.len());
        let end = start
            .saturating_add(pagination.limit as usize)
            .min(matched.len());
        let movements = matched.drain(start..end).collect();
        Self {
            movements,
            total,
            pagination,
            has_more: (end as u64) < total,
        }
    }
}
