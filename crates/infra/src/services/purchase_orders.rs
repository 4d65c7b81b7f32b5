use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use stockledger_core::{
    Aggregate, AggregateRoot, DomainError, ExpectedVersion, ProductVariantId, PurchaseOrderId,
    PurchaseOrderItemId, StoreId, UserId,
};
use stockledger_inventory::{NewMovement, StockMovement};
use stockledger_purchasing::{
    AddItem, CancelPurchaseOrder, CreatePurchaseOrder, NewPurchaseOrderItem, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderEvent, ReceiptLine, ReceiveItems, RemoveItem, UpdateItem,
};

use crate::clock::Clock;
use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{InventoryError, StoreError};
use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
use crate::purchase_orders::{InMemoryPurchaseOrderRepository, PurchaseOrderRepository};
use crate::services::with_retries;
use crate::writer::{LedgerWriter, WriteBatch};

/// Requested line of a new or extended purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant_id: ProductVariantId,
    pub quantity_ordered: i64,
    pub unit_cost_cents: i64,
}

impl OrderLine {
    pub fn new(variant_id: ProductVariantId, quantity_ordered: i64, unit_cost_cents: i64) -> Self {
        Self {
            variant_id,
            quantity_ordered,
            unit_cost_cents,
        }
    }

    fn into_item(self) -> NewPurchaseOrderItem {
        NewPurchaseOrderItem::new(self.variant_id, self.quantity_ordered, self.unit_cost_cents)
    }
}

/// Result of receiving goods: the updated order and the movements it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptOutcome {
    pub order: PurchaseOrder,
    pub movements: Vec<StockMovement>,
}

/// Owns the purchase order lifecycle.
///
/// Every operation loads the order, lets the aggregate decide, and commits the resulting
/// events (plus receipt movements) at the version it loaded.
#[derive(Debug)]
pub struct PurchaseOrderManager<L = InMemoryLedgerStore, R = InMemoryPurchaseOrderRepository> {
    writer: Arc<LedgerWriter<L, R>>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl<L, R> PurchaseOrderManager<L, R>
where
    L: LedgerStore,
    R: PurchaseOrderRepository,
{
    pub fn new(writer: Arc<LedgerWriter<L, R>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            writer,
            clock,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn create_purchase_order(
        &self,
        store_id: StoreId,
        supplier_name: &str,
        lines: Vec<OrderLine>,
        created_by: UserId,
    ) -> Result<PurchaseOrder, InventoryError> {
        let items: Vec<NewPurchaseOrderItem> = lines.into_iter().map(OrderLine::into_item).collect();
        CreatePurchaseOrder::validate_draft(store_id, supplier_name, &items, created_by)?;

        let po_number = self.writer.orders().allocate_po_number()?;
        let order_id = PurchaseOrderId::new();
        let cmd = PurchaseOrderCommand::Create(CreatePurchaseOrder {
            order_id,
            po_number,
            store_id,
            supplier_name: supplier_name.trim().to_string(),
            items,
            created_by,
            occurred_at: self.clock.now(),
        });
        let events = PurchaseOrder::empty(order_id).handle(&cmd)?;

        let outcome = self.writer.commit(WriteBatch::new().with_order_change(
            order_id,
            ExpectedVersion::New,
            events,
        ))?;
        let order = outcome
            .order
            .ok_or_else(|| InventoryError::Storage("create committed no order".into()))?;

        info!(
            order_id = %order_id,
            po_number = %order.po_number(),
            store_id = %store_id,
            items = order.items().len(),
            "purchase order created"
        );
        Ok(order)
    }

    pub fn add_item(
        &self,
        order_id: PurchaseOrderId,
        line: OrderLine,
        updated_by: UserId,
    ) -> Result<PurchaseOrder, InventoryError> {
        let item = line.into_item();
        let outcome = self.execute("add_purchase_order_item", order_id, |now| {
            PurchaseOrderCommand::AddItem(AddItem {
                order_id,
                item: item.clone(),
                updated_by,
                occurred_at: now,
            })
        })?;
        Ok(outcome.order)
    }

    pub fn update_item(
        &self,
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        quantity_ordered: Option<i64>,
        unit_cost_cents: Option<i64>,
        updated_by: UserId,
    ) -> Result<PurchaseOrder, InventoryError> {
        let outcome = self.execute("update_purchase_order_item", order_id, |now| {
            PurchaseOrderCommand::UpdateItem(UpdateItem {
                order_id,
                item_id,
                quantity_ordered,
                unit_cost_cents,
                updated_by,
                occurred_at: now,
            })
        })?;
        Ok(outcome.order)
    }

    pub fn remove_item(
        &self,
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        updated_by: UserId,
    ) -> Result<PurchaseOrder, InventoryError> {
        let outcome = self.execute("remove_purchase_order_item", order_id, |now| {
            PurchaseOrderCommand::RemoveItem(RemoveItem {
                order_id,
                item_id,
                updated_by,
                occurred_at: now,
            })
        })?;
        Ok(outcome.order)
    }

    /// Receive goods against the order. One `PURCHASE_RECEIPT` movement is appended per
    /// line, together with the order update, or nothing at all.
    pub fn receive_items(
        &self,
        order_id: PurchaseOrderId,
        lines: Vec<ReceiptLine>,
        received_by: UserId,
    ) -> Result<ReceiptOutcome, InventoryError> {
        let outcome = self.execute("receive_items", order_id, |now| {
            PurchaseOrderCommand::ReceiveItems(ReceiveItems {
                order_id,
                lines: lines.clone(),
                received_by,
                occurred_at: now,
            })
        })?;

        info!(
            order_id = %order_id,
            po_number = %outcome.order.po_number(),
            movements = outcome.movements.len(),
            status = %outcome.order.status(),
            "purchase order items received"
        );
        Ok(outcome)
    }

    pub fn cancel_purchase_order(
        &self,
        order_id: PurchaseOrderId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> Result<PurchaseOrder, InventoryError> {
        let outcome = self.execute("cancel_purchase_order", order_id, |now| {
            PurchaseOrderCommand::Cancel(CancelPurchaseOrder {
                order_id,
                cancelled_by,
                reason: reason.clone(),
                occurred_at: now,
            })
        })?;

        info!(order_id = %order_id, po_number = %outcome.order.po_number(), "purchase order cancelled");
        Ok(outcome.order)
    }

    /// Load, decide, commit at the loaded version; re-plan on conflict.
    fn execute(
        &self,
        operation: &'static str,
        order_id: PurchaseOrderId,
        command: impl Fn(DateTime<Utc>) -> PurchaseOrderCommand,
    ) -> Result<ReceiptOutcome, InventoryError> {
        with_retries(operation, self.max_retries, || {
            let order = self
                .writer
                .orders()
                .load(order_id)?
                .ok_or_else(|| DomainError::not_found("purchase_order", order_id))?;

            let events = order.handle(&command(self.clock.now()))?;
            let movements = receipt_movements(&events);

            let outcome = self.writer.commit(
                WriteBatch::new()
                    .with_movements(movements)
                    .with_order_change(order_id, ExpectedVersion::Exact(order.version()), events),
            )?;
            let order = outcome
                .order
                .ok_or_else(|| StoreError::Corrupt(format!("{operation} committed no order change")))?;

            Ok(ReceiptOutcome {
                order,
                movements: outcome.movements,
            })
        })
    }
}

/// One receipt movement per received line.
fn receipt_movements(events: &[PurchaseOrderEvent]) -> Vec<NewMovement> {
    events
        .iter()
        .filter_map(|event| match event {
            PurchaseOrderEvent::ItemsReceived(received) => Some(received),
            _ => None,
        })
        .flat_map(|received| {
            received.lines.iter().map(move |line| {
                NewMovement::purchase_receipt(
                    received.store_id,
                    line.variant_id,
                    line.quantity,
                    received.order_id,
                    line.item_id,
                    received.received_by,
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::projections::LevelScope;
    use stockledger_inventory::{MovementReason, StockPolicy};
    use stockledger_purchasing::PurchaseOrderStatus;

    struct Fixture {
        writer: Arc<LedgerWriter>,
        manager: PurchaseOrderManager,
        store: StoreId,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let writer = Arc::new(LedgerWriter::in_memory(
            StockPolicy::default(),
            "PO-",
            clock.clone(),
        ));
        let manager = PurchaseOrderManager::new(writer.clone(), clock);
        Fixture {
            writer,
            manager,
            store: StoreId::new(),
            user: UserId::new(),
        }
    }

    fn receipt(item_id: PurchaseOrderItemId, quantity: i64) -> ReceiptLine {
        ReceiptLine { item_id, quantity }
    }

    #[test]
    fn create_assigns_sequential_numbers() {
        let f = fixture();
        let variant = ProductVariantId::new();
        let a = f
            .manager
            .create_purchase_order(f.store, "Acme", vec![OrderLine::new(variant, 1, 100)], f.user)
            .unwrap();
        let b = f
            .manager
            .create_purchase_order(f.store, " Globex ", vec![OrderLine::new(variant, 2, 100)], f.user)
            .unwrap();

        assert_eq!(a.po_number().as_str(), "PO-000001");
        assert_eq!(b.po_number().as_str(), "PO-000002");
        assert_eq!(b.supplier_name(), "Globex");
        assert_eq!(a.status(), PurchaseOrderStatus::Open);
    }

    #[test]
    fn rejected_draft_does_not_consume_a_number() {
        let f = fixture();
        let variant = ProductVariantId::new();
        let err = f
            .manager
            .create_purchase_order(f.store, "Acme", vec![OrderLine::new(variant, 0, 100)], f.user)
            .unwrap_err();
        assert!(matches!(err, InventoryError::Domain(DomainError::Validation(_))));

        let ok = f
            .manager
            .create_purchase_order(f.store, "Acme", vec![OrderLine::new(variant, 3, 100)], f.user)
            .unwrap();
        assert_eq!(ok.po_number().as_str(), "PO-000001");
    }

    #[test]
    fn receive_appends_linked_receipts_and_updates_levels() {
        let f = fixture();
        let variant = ProductVariantId::new();
        let order = f
            .manager
            .create_purchase_order(f.store, "Acme", vec![OrderLine::new(variant, 10, 500)], f.user)
            .unwrap();
        let item_id = order.items()[0].id;

        let outcome = f
            .manager
            .receive_items(order.id_typed(), vec![receipt(item_id, 4)], f.user)
            .unwrap();

        assert_eq!(outcome.order.status(), PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(outcome.movements.len(), 1);
        let m = &outcome.movements[0];
        assert_eq!(*m.reason(), MovementReason::PurchaseReceipt);
        assert_eq!(m.purchase_order_id(), Some(order.id_typed()));
        assert_eq!(m.purchase_order_item_id(), Some(item_id));
        assert_eq!(f.writer.levels().get_level(f.store, variant).unwrap(), 4);
        assert!(f.writer.verify(LevelScope::all()).is_ok());
    }

    #[test]
    fn over_receipt_leaves_no_trace() {
        let f = fixture();
        let variant = ProductVariantId::new();
        let order = f
            .manager
            .create_purchase_order(f.store, "Acme", vec![OrderLine::new(variant, 5, 100)], f.user)
            .unwrap();
        let item_id = order.items()[0].id;

        let err = f
            .manager
            .receive_items(
                order.id_typed(),
                vec![receipt(item_id, 3), receipt(item_id, 3)],
                f.user,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Domain(DomainError::OverReceipt {
                ordered: 5,
                received: 0,
                requested: 6,
                ..
            })
        ));
        assert_eq!(f.writer.ledger().last_sequence().unwrap(), 0);
        let reloaded = f.writer.orders().load(order.id_typed()).unwrap().unwrap();
        assert_eq!(reloaded.version(), order.version());
    }

    #[test]
    fn edits_are_blocked_after_receiving() {
        let f = fixture();
        let variant = ProductVariantId::new();
        let order = f
            .manager
            .create_purchase_order(f.store, "Acme", vec![OrderLine::new(variant, 5, 100)], f.user)
            .unwrap();
        let item_id = order.items()[0].id;

        let extended = f
            .manager
            .add_item(order.id_typed(), OrderLine::new(ProductVariantId::new(), 2, 50), f.user)
            .unwrap();
        assert_eq!(extended.items().len(), 2);

        f.manager
            .receive_items(order.id_typed(), vec![receipt(item_id, 1)], f.user)
            .unwrap();
        let err = f
            .manager
            .update_item(order.id_typed(), item_id, Some(9), None, f.user)
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Domain(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn cancel_blocks_receiving_and_keeps_movements() {
        let f = fixture();
        let variant = ProductVariantId::new();
        let order = f
            .manager
            .create_purchase_order(f.store, "Acme", vec![OrderLine::new(variant, 5, 100)], f.user)
            .unwrap();
        let item_id = order.items()[0].id;
        f.manager
            .receive_items(order.id_typed(), vec![receipt(item_id, 2)], f.user)
            .unwrap();

        let cancelled = f
            .manager
            .cancel_purchase_order(order.id_typed(), f.user, Some("supplier bankrupt".into()))
            .unwrap();
        assert_eq!(cancelled.status(), PurchaseOrderStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason(), Some("supplier bankrupt"));

        let err = f
            .manager
            .receive_items(order.id_typed(), vec![receipt(item_id, 1)], f.user)
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Domain(DomainError::InvariantViolation(_))
        ));
        assert_eq!(f.writer.levels().get_level(f.store, variant).unwrap(), 2);
    }

    #[test]
    fn unknown_order_is_not_found() {
        let f = fixture();
        let err = f
            .manager
            .cancel_purchase_order(PurchaseOrderId::new(), f.user, None)
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Domain(DomainError::NotFound {
                entity: "purchase_order",
                ..
            })
        ));
    }
}
