//! Movement query interface for history views and reconciliation.
//!
//! All queries are paginated by default; [`MovementStream`] walks the pages lazily.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{MovementId, ProductVariantId, PurchaseOrderId, StoreId};
use stockledger_inventory::{MovementReason, StockMovement};

use crate::error::StoreError;
use crate::ledger_store::LedgerStore;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of entries to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

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
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(Some(limit), None)
    }

    pub fn next(self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            ..self
        }
    }

    /// Re-apply the bounds to values that did not come through [`Pagination::new`].
    pub fn normalized(self) -> Self {
        Self::new(Some(self.limit), Some(self.offset))
    }

    /// Slice one page out of an already filtered and ordered list.
    pub fn page<T: Clone>(self, all: &[T]) -> (Vec<T>, bool) {
        let p = self.normalized();
        let start = (p.offset as usize).min(all.len());
        let end = start.saturating_add(p.limit as usize).min(all.len());
        (all[start..end].to_vec(), end < all.len())
    }
}

/// Filter criteria for movement queries. Every field is optional; set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub store_id: Option<StoreId>,
    pub variant_id: Option<ProductVariantId>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    pub reason: Option<MovementReason>,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub reverses: Option<MovementId>,
}

impl MovementFilter {
    pub fn for_key(store_id: StoreId, variant_id: ProductVariantId) -> Self {
        Self {
            store_id: Some(store_id),
            variant_id: Some(variant_id),
            ..Self::default()
        }
    }

    pub fn for_store(store_id: StoreId) -> Self {
        Self {
            store_id: Some(store_id),
            ..Self::default()
        }
    }

    pub fn for_purchase_order(order_id: PurchaseOrderId) -> Self {
        Self {
            purchase_order_id: Some(order_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, m: &StockMovement) -> bool {
        self.store_id.is_none_or(|s| m.store_id() == s)
            && self.variant_id.is_none_or(|v| m.variant_id() == v)
            && self.from.is_none_or(|from| m.created_at() >= from)
            && self.to.is_none_or(|to| m.created_at() < to)
            && self.reason.as_ref().is_none_or(|r| m.reason() == r)
            && self
                .purchase_order_id
                .is_none_or(|po| m.purchase_order_id() == Some(po))
            && self.reverses.is_none_or(|id| m.reverses() == Some(id))
    }
}

/// Paginated movement query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementQueryResult {
    /// Matches in ledger order (`created_at` ascending, ties by sequence).
    pub movements: Vec<StockMovement>,
    /// Total number of matches (across all pages).
    pub total: u64,
    /// Pagination parameters used.
    pub pagination: Pagination,
    /// Whether there are more matches after this page.
    pub has_more: bool,
}

/// Lazy iterator over every movement matching a filter, fetched one page at a time.
///
/// Pages are addressed by offset, so movements appended while streaming that sort after
/// the cursor are picked up; movements never move, so none are skipped or repeated.
pub struct MovementStream<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    filter: MovementFilter,
    next_page: Option<Pagination>,
    buffer: VecDeque<StockMovement>,
}

impl<'a, S: LedgerStore + ?Sized> MovementStream<'a, S> {
    pub fn new(store: &'a S, filter: MovementFilter, page_size: u32) -> Self {
        Self {
            store,
            filter,
            next_page: Some(Pagination::first(page_size)),
            buffer: VecDeque::new(),
        }
    }
}

impl<S: LedgerStore + ?Sized> Iterator for MovementStream<'_, S> {
    type Item = Result<StockMovement, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(m) = self.buffer.pop_front() {
            return Some(Ok(m));
        }

        let page = self.next_page.take()?;
        match self.store.query(&self.filter, page) {
            Ok(result) => {
                if result.has_more {
                    self.next_page = Some(page.next());
                }
                self.buffer.extend(result.movements);
                self.buffer.pop_front().map(Ok)
            }
            Err(err) => Some(Err(err)),
        }
    }
}
