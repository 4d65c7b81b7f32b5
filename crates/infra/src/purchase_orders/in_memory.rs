use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use stockledger_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, PurchaseOrderId};
use stockledger_purchasing::{PoNumber, PurchaseOrder, PurchaseOrderEvent};

use crate::config::DEFAULT_PO_PREFIX;
use crate::error::StoreError;
use crate::ledger_store::Pagination;
use crate::purchase_orders::r#trait::{
    PurchaseOrderExport, PurchaseOrderFilter, PurchaseOrderPage, PurchaseOrderRepository,
    RecordedPurchaseOrderEvent,
};

#[derive(Debug, Default)]
struct RepositoryInner {
    streams: HashMap<PurchaseOrderId, Vec<RecordedPurchaseOrderEvent>>,
    /// Current state per order (fold of its stream).
    orders: HashMap<PurchaseOrderId, PurchaseOrder>,
    by_number: HashMap<PoNumber, PurchaseOrderId>,
    next_number: u64,
}

/// In-memory, event-sourced purchase order repository.
#[derive(Debug)]
pub struct InMemoryPurchaseOrderRepository {
    inner: RwLock<RepositoryInner>,
    po_prefix: String,
}

impl Default for InMemoryPurchaseOrderRepository {
    fn default() -> Self {
        Self::new(DEFAULT_PO_PREFIX)
    }
}

impl InMemoryPurchaseOrderRepository {
    pub fn new(po_prefix: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(RepositoryInner {
                next_number: 1,
                ..RepositoryInner::default()
            }),
            po_prefix: po_prefix.into(),
        }
    }

    pub fn po_prefix(&self) -> &str {
        &self.po_prefix
    }

    /// Restore from an export, replaying every stream.
    pub fn from_export(export: PurchaseOrderExport) -> Result<Self, StoreError> {
        let mut grouped: BTreeMap<PurchaseOrderId, Vec<RecordedPurchaseOrderEvent>> =
            BTreeMap::new();
        for recorded in export.events {
            if recorded.order_id != recorded.event.order_id() {
                return Err(StoreError::Corrupt(format!(
                    "event in stream {} belongs to order {}",
                    recorded.order_id,
                    recorded.event.order_id()
                )));
            }
            grouped.entry(recorded.order_id).or_default().push(recorded);
        }

        let mut inner = RepositoryInner {
            next_number: export.next_number.max(1),
            ..RepositoryInner::default()
        };
        for (id, mut stream) in grouped {
            stream.sort_by_key(|e| e.sequence);
            for (idx, e) in stream.iter().enumerate() {
                if e.sequence != idx as u64 + 1 {
                    return Err(StoreError::Corrupt(format!(
                        "purchase order {id} stream has a gap at {}",
                        idx + 1
                    )));
                }
            }

            let order = PurchaseOrder::rehydrate(id, stream.iter().map(|e| &e.event));
            if !order.is_created() {
                return Err(StoreError::Corrupt(format!(
                    "purchase order {id} stream does not start with a creation"
                )));
            }
            if inner
                .by_number
                .insert(order.po_number().clone(), id)
                .is_some()
            {
                return Err(StoreError::Corrupt(format!(
                    "duplicate po_number {}",
                    order.po_number()
                )));
            }
            if let Some(seq) = order.po_number().sequence(&export.po_prefix) {
                inner.next_number = inner.next_number.max(seq + 1);
            }

            inner.orders.insert(id, order);
            inner.streams.insert(id, stream);
        }

        Ok(Self {
            inner: RwLock::new(inner),
            po_prefix: export.po_prefix,
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RepositoryInner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Poisoned("purchase orders"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RepositoryInner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Poisoned("purchase orders"))
    }
}

impl PurchaseOrderRepository for InMemoryPurchaseOrderRepository {
    fn allocate_po_number(&self) -> Result<PoNumber, StoreError> {
        let mut inner = self.write()?;
        let number = PoNumber::format(&self.po_prefix, inner.next_number);
        inner.next_number += 1;
        Ok(number)
    }

    fn load(&self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    fn get_by_number(&self, po_number: &str) -> Result<Option<PurchaseOrder>, StoreError> {
        let key = match PoNumber::parse(po_number) {
            Ok(key) => key,
            Err(_) => return Ok(None),
        };
        let inner = self.read()?;
        Ok(inner
            .by_number
            .get(&key)
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }

    fn list(
        &self,
        filter: &PurchaseOrderFilter,
        pagination: Pagination,
    ) -> Result<PurchaseOrderPage, StoreError> {
        let pagination = pagination.normalized();
        let inner = self.read()?;

        let mut matches: Vec<&PurchaseOrder> =
            inner.orders.values().filter(|o| filter.matches(o)).collect();
        matches.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.po_number().cmp(a.po_number()))
        });

        let total = matches.len() as u64;
        let (page, has_more) = pagination.page(&matches);
        Ok(PurchaseOrderPage {
            orders: page.into_iter().cloned().collect(),
            total,
            pagination,
            has_more,
        })
    }

    fn history(&self, id: PurchaseOrderId) -> Result<Vec<RecordedPurchaseOrderEvent>, StoreError> {
        Ok(self.read()?.streams.get(&id).cloned().unwrap_or_default())
    }

    fn version(&self, id: PurchaseOrderId) -> Result<u64, StoreError> {
        Ok(self
            .read()?
            .streams
            .get(&id)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    fn save(
        &self,
        id: PurchaseOrderId,
        expected: ExpectedVersion,
        events: &[PurchaseOrderEvent],
    ) -> Result<PurchaseOrder, StoreError> {
        let mut inner = self.write()?;

        let current = inner.streams.get(&id).map(|s| s.len() as u64).unwrap_or(0);
        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "purchase order {id}: expected {expected}, found {current}"
            )));
        }

        if let Some((idx, _)) = events.iter().enumerate().find(|(_, e)| e.order_id() != id) {
            return Err(DomainError::invariant(format!(
                "event {idx} does not belong to purchase order {id}"
            ))
            .into());
        }

        let mut order = inner
            .orders
            .get(&id)
            .cloned()
            .unwrap_or_else(|| PurchaseOrder::empty(id));
        let was_created = order.is_created();
        for e in events {
            order.apply(e);
        }

        if !order.is_created() {
            return Err(DomainError::not_found("purchase_order", id).into());
        }
        if !was_created {
            if let Some(existing) = inner.by_number.get(order.po_number()) {
                if *existing != id {
                    return Err(StoreError::Duplicate(format!(
                        "po_number {} already used by {existing}",
                        order.po_number()
                    )));
                }
            }
            inner.by_number.insert(order.po_number().clone(), id);
        }

        let stream = inner.streams.entry(id).or_default();
        for e in events {
            let sequence = stream.len() as u64 + 1;
            stream.push(RecordedPurchaseOrderEvent::new(sequence, e.clone()));
        }
        debug_assert_eq!(stream.len() as u64, order.version());

        inner.orders.insert(id, order.clone());
        Ok(order)
    }

    fn export(&self) -> Result<PurchaseOrderExport, StoreError> {
        let inner = self.read()?;
        let mut ids: Vec<&PurchaseOrderId> = inner.streams.keys().collect();
        ids.sort();
        let events = ids
            .into_iter()
            .flat_map(|id| inner.streams[id].iter().cloned())
            .collect();

        Ok(PurchaseOrderExport {
            po_prefix: self.po_prefix.clone(),
            next_number: inner.next_number,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use stockledger_core::{ProductVariantId, PurchaseOrderItemId, StoreId, UserId};
    use stockledger_purchasing::{
        CreatePurchaseOrder, NewPurchaseOrderItem, PurchaseOrderCommand, PurchaseOrderStatus,
    };

    use super::*;

    fn created_events(
        repo: &InMemoryPurchaseOrderRepository,
        store_id: StoreId,
        supplier: &str,
        minutes_ago: i64,
    ) -> (PurchaseOrderId, Vec<PurchaseOrderEvent>) {
        let id = PurchaseOrderId::new();
        let cmd = CreatePurchaseOrder {
            order_id: id,
            po_number: repo.allocate_po_number().unwrap(),
            store_id,
            supplier_name: supplier.to_string(),
            items: vec![NewPurchaseOrderItem {
                item_id: PurchaseOrderItemId::new(),
                variant_id: ProductVariantId::new(),
                quantity_ordered: 3,
                unit_cost_cents: 100,
            }],
            created_by: UserId::new(),
            occurred_at: Utc::now() - Duration::minutes(minutes_ago),
        };
        let events = PurchaseOrder::empty(id)
            .handle(&PurchaseOrderCommand::Create(cmd))
            .unwrap();
        (id, events)
    }

    #[test]
    fn numbers_are_monotonic_and_never_reused() {
        let repo = InMemoryPurchaseOrderRepository::default();
        let a = repo.allocate_po_number().unwrap();
        let b = repo.allocate_po_number().unwrap();
        assert_eq!(a.as_str(), "PO-000001");
        assert_eq!(b.as_str(), "PO-000002");
        assert!(a < b);
    }

    #[test]
    fn save_enforces_expected_version() {
        let repo = InMemoryPurchaseOrderRepository::default();
        let (id, events) = created_events(&repo, StoreId::new(), "Acme", 0);

        let order = repo.save(id, ExpectedVersion::New, &events).unwrap();
        assert_eq!(order.version(), 1);
        assert_eq!(repo.version(id).unwrap(), 1);

        let err = repo.save(id, ExpectedVersion::New, &events).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.history(id).unwrap().len(), 1);
        assert_eq!(
            repo.get_by_number(order.po_number().as_str()).unwrap(),
            Some(order)
        );
    }

    #[test]
    fn list_filters_and_orders_newest_first() {
        let repo = InMemoryPurchaseOrderRepository::default();
        let store = StoreId::new();
        for (supplier, minutes_ago) in [("Acme Supplies", 30), ("Globex", 20), ("ACME Parts", 10)] {
            let (id, events) = created_events(&repo, store, supplier, minutes_ago);
            repo.save(id, ExpectedVersion::New, &events).unwrap();
        }
        let (id, events) = created_events(&repo, StoreId::new(), "Acme", 0);
        repo.save(id, ExpectedVersion::New, &events).unwrap();

        let filter = PurchaseOrderFilter {
            store_id: Some(store),
            status: Some(PurchaseOrderStatus::Open),
            supplier: Some("acme".to_string()),
        };
        let page = repo.list(&filter, Pagination::default()).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.orders[0].supplier_name(), "ACME Parts");
        assert_eq!(page.orders[1].supplier_name(), "Acme Supplies");
    }

    #[test]
    fn export_round_trips_streams_and_number_sequence() {
        let repo = InMemoryPurchaseOrderRepository::new("PUR-");
        let (id, events) = created_events(&repo, StoreId::new(), "Acme", 0);
        repo.save(id, ExpectedVersion::New, &events).unwrap();
        // Reserved but never saved.
        repo.allocate_po_number().unwrap();

        let restored = InMemoryPurchaseOrderRepository::from_export(repo.export().unwrap()).unwrap();
        assert_eq!(restored.load(id).unwrap(), repo.load(id).unwrap());
        assert_eq!(restored.allocate_po_number().unwrap().as_str(), "PUR-000003");
    }
}
