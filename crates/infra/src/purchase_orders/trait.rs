use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Event, ExpectedVersion, PurchaseOrderId, StoreId};
use stockledger_purchasing::{PoNumber, PurchaseOrder, PurchaseOrderEvent, PurchaseOrderStatus};

use crate::error::StoreError;
use crate::ledger_store::Pagination;

/// A purchase order event as persisted in the order's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedPurchaseOrderEvent {
    pub order_id: PurchaseOrderId,
    /// 1-based position in the order's stream; equals the order version after applying it.
    pub sequence: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub event: PurchaseOrderEvent,
}

impl RecordedPurchaseOrderEvent {
    pub fn new(sequence: u64, event: PurchaseOrderEvent) -> Self {
        Self {
            order_id: event.order_id(),
            sequence,
            event_type: event.event_type().to_string(),
            occurred_at: event.occurred_at(),
            event,
        }
    }
}

/// Filter criteria for order lists. Set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderFilter {
    pub store_id: Option<StoreId>,
    pub status: Option<PurchaseOrderStatus>,
    /// Case-insensitive substring of the supplier name.
    pub supplier: Option<String>,
}

impl PurchaseOrderFilter {
    pub fn matches(&self, order: &PurchaseOrder) -> bool {
        self.store_id.is_none_or(|s| order.store_id() == s)
            && self.status.is_none_or(|s| order.status() == s)
            && self.supplier.as_deref().is_none_or(|needle| {
                order
                    .supplier_name()
                    .to_lowercase()
                    .contains(&needle.trim().to_lowercase())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderPage {
    /// Newest first.
    pub orders: Vec<PurchaseOrder>,
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Everything needed to restore a repository: its event streams and number sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderExport {
    pub po_prefix: String,
    /// Next sequence the number generator would hand out.
    pub next_number: u64,
    pub events: Vec<RecordedPurchaseOrderEvent>,
}

/// Event-sourced purchase order storage.
///
/// Each order is a stream of [`PurchaseOrderEvent`]s; the current state is their fold.
/// `save` enforces optimistic concurrency against the stream version.
pub trait PurchaseOrderRepository: Send + Sync {
    /// Hand out the next PO number. Numbers are never reused while the repository lives,
    /// even if the order that reserved one is never saved. A repository rebuilt from
    /// saved streams continues after the highest saved number.
    fn allocate_po_number(&self) -> Result<PoNumber, StoreError>;

    fn load(&self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError>;

    fn get_by_number(&self, po_number: &str) -> Result<Option<PurchaseOrder>, StoreError>;

    fn list(
        &self,
        filter: &PurchaseOrderFilter,
        pagination: Pagination,
    ) -> Result<PurchaseOrderPage, StoreError>;

    fn history(&self, id: PurchaseOrderId) -> Result<Vec<RecordedPurchaseOrderEvent>, StoreError>;

    /// Current stream version (0 when the order does not exist).
    fn version(&self, id: PurchaseOrderId) -> Result<u64, StoreError>;

    /// Append events to the order's stream and return the new state.
    fn save(
        &self,
        id: PurchaseOrderId,
        expected: ExpectedVersion,
        events: &[PurchaseOrderEvent],
    ) -> Result<PurchaseOrder, StoreError>;

    fn export(&self) -> Result<PurchaseOrderExport, StoreError>;
}

impl<R> PurchaseOrderRepository for Arc<R>
where
    R: PurchaseOrderRepository + ?Sized,
{
    fn allocate_po_number(&self) -> Result<PoNumber, StoreError> {
        (**self).allocate_po_number()
    }

    fn load(&self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        (**self).load(id)
    }

    fn get_by_number(&self, po_number: &str) -> Result<Option<PurchaseOrder>, StoreError> {
        (**self).get_by_number(po_number)
    }

    fn list(
        &self,
        filter: &PurchaseOrderFilter,
        pagination: Pagination,
    ) -> Result<PurchaseOrderPage, StoreError> {
        (**self).list(filter, pagination)
    }

    fn history(&self, id: PurchaseOrderId) -> Result<Vec<RecordedPurchaseOrderEvent>, StoreError> {
        (**self).history(id)
    }

    fn version(&self, id: PurchaseOrderId) -> Result<u64, StoreError> {
        (**self).version(id)
    }

    fn save(
        &self,
        id: PurchaseOrderId,
        expected: ExpectedVersion,
        events: &[PurchaseOrderEvent],
    ) -> Result<PurchaseOrder, StoreError> {
        (**self).save(id, expected, events)
    }

    fn export(&self) -> Result<PurchaseOrderExport, StoreError> {
        (**self).export()
    }
}
