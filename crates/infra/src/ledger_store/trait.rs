use std::collections::BTreeMap;
use std::sync::Arc;

use stockledger_core::MovementId;
use stockledger_inventory::{LedgerTotal, NewMovement, StockKey, StockMovement};

use crate::error::StoreError;
use crate::ledger_store::query::{MovementFilter, MovementQueryResult, MovementStream, Pagination};

/// Append-only stock movement ledger: the single source of truth for quantity.
///
/// ## Append Semantics
///
/// `append()`:
/// - validates every entry (non-zero change, present ids, reason/receipt consistency,
///   reversal targets)
/// - assigns ids, gap-free sequences and non-decreasing `created_at` timestamps
/// - persists the batch atomically (a failing entry aborts the whole batch)
///
/// `append_with()` additionally hands the assigned movements to a persistence hook before
/// they become visible to readers. If the hook fails nothing is appended. The hook runs
/// for empty batches too, so commits that only touch purchase orders are persisted the
/// same way.
///
/// There is no update or delete. Corrections are new movements.
///
/// Stock policy is not the ledger's concern; the ledger writer checks it against the
/// projected levels before appending.
pub trait LedgerStore: Send + Sync {
    fn append_with(
        &self,
        batch: Vec<NewMovement>,
        persist: &mut dyn FnMut(&[StockMovement]) -> Result<(), StoreError>,
    ) -> Result<Vec<StockMovement>, StoreError>;

    fn append(&self, batch: Vec<NewMovement>) -> Result<Vec<StockMovement>, StoreError> {
        self.append_with(batch, &mut |_| Ok(()))
    }

    fn get(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError>;

    /// The movement that reverses `id`, if any.
    fn reversal_of(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError>;

    /// Matches ordered by `created_at` ascending (ties by sequence).
    fn query(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StoreError>;

    /// Sum of the matching movements per key.
    fn totals(&self, filter: &MovementFilter) -> Result<BTreeMap<StockKey, LedgerTotal>, StoreError>;

    /// Sequence of the last appended movement (0 when empty).
    fn last_sequence(&self) -> Result<u64, StoreError>;

    /// Every movement in sequence order.
    fn export(&self) -> Result<Vec<StockMovement>, StoreError>;

    fn stream(&self, filter: MovementFilter, page_size: u32) -> MovementStream<'_, Self>
    where
        Self: Sized,
    {
        MovementStream::new(self, filter, page_size)
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn append_with(
        &self,
        batch: Vec<NewMovement>,
        persist: &mut dyn FnMut(&[StockMovement]) -> Result<(), StoreError>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).append_with(batch, persist)
    }

    fn get(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        (**self).get(id)
    }

    fn reversal_of(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        (**self).reversal_of(id)
    }

    fn query(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StoreError> {
        (**self).query(filter, pagination)
    }

    fn totals(&self, filter: &MovementFilter) -> Result<BTreeMap<StockKey, LedgerTotal>, StoreError> {
        (**self).totals(filter)
    }

    fn last_sequence(&self) -> Result<u64, StoreError> {
        (**self).last_sequence()
    }

    fn export(&self) -> Result<Vec<StockMovement>, StoreError> {
        (**self).export()
    }
}
