use std::sync::Arc;

use tracing::info;

use stockledger_core::DomainError;
use stockledger_inventory::{AdjustStock, RecordStockCount, ReverseMovement, StockMovement};

use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{InventoryError, StoreError};
use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
use crate::purchase_orders::{InMemoryPurchaseOrderRepository, PurchaseOrderRepository};
use crate::services::with_retries;
use crate::writer::{CommitOutcome, LedgerWriter, WriteBatch};

/// Ad-hoc stock changes outside purchase orders.
///
/// Each decision is made against a level read and committed with that level's version, so
/// a concurrent write to the same key forces a re-plan.
#[derive(Debug)]
pub struct StockAdjustmentService<L = InMemoryLedgerStore, R = InMemoryPurchaseOrderRepository> {
    writer: Arc<LedgerWriter<L, R>>,
    max_retries: u32,
}

impl<L, R> StockAdjustmentService<L, R>
where
    L: LedgerStore,
    R: PurchaseOrderRepository,
{
    pub fn new(writer: Arc<LedgerWriter<L, R>>) -> Self {
        Self {
            writer,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn adjust_stock(&self, cmd: AdjustStock) -> Result<StockMovement, InventoryError> {
        let key = cmd.key();
        let movement = with_retries("adjust_stock", self.max_retries, || {
            let level = self.writer.levels().level_or_empty(key)?;
            let planned = cmd.plan(level.quantity(), self.writer.policy())?;
            let outcome = self.writer.commit(
                WriteBatch::new()
                    .with_movement(planned)
                    .expect_level(key, level.version()),
            )?;
            single_movement(outcome)
        })?;

        info!(
            store_id = %key.store_id,
            variant_id = %key.variant_id,
            change = movement.change_quantity(),
            reason = %movement.reason(),
            sequence = movement.sequence(),
            "stock adjusted"
        );
        Ok(movement)
    }

    /// Record a physical count. Returns `None` when the count matches the current level.
    pub fn record_stock_count(
        &self,
        cmd: RecordStockCount,
    ) -> Result<Option<StockMovement>, InventoryError> {
        let key = cmd.key();
        let movement = with_retries("record_stock_count", self.max_retries, || {
            let level = self.writer.levels().level_or_empty(key)?;
            let Some(planned) = cmd.plan(level.quantity())? else {
                return Ok(None);
            };
            let outcome = self.writer.commit(
                WriteBatch::new()
                    .with_movement(planned)
                    .expect_level(key, level.version()),
            )?;
            single_movement(outcome).map(Some)
        })?;

        match &movement {
            Some(m) => info!(
                store_id = %key.store_id,
                variant_id = %key.variant_id,
                counted = cmd.counted_quantity,
                change = m.change_quantity(),
                "stock count recorded"
            ),
            None => info!(
                store_id = %key.store_id,
                variant_id = %key.variant_id,
                counted = cmd.counted_quantity,
                "stock count matches level"
            ),
        }
        Ok(movement)
    }

    /// Append the offsetting correction for an earlier movement.
    pub fn reverse_movement(&self, cmd: ReverseMovement) -> Result<StockMovement, InventoryError> {
        let movement = with_retries("reverse_movement", self.max_retries, || {
            let ledger = self.writer.ledger();
            let original = ledger
                .get(cmd.movement_id)?
                .ok_or_else(|| DomainError::not_found("stock_movement", cmd.movement_id))?;
            let already_reversed = ledger.reversal_of(original.id())?.is_some();

            let key = original.key();
            let level = self.writer.levels().level_or_empty(key)?;
            let planned = cmd.plan(
                &original,
                already_reversed,
                level.quantity(),
                self.writer.policy(),
            )?;
            let outcome = self.writer.commit(
                WriteBatch::new()
                    .with_movement(planned)
                    .expect_level(key, level.version()),
            )?;
            single_movement(outcome)
        })?;

        info!(
            reversed = %cmd.movement_id,
            movement_id = %movement.id(),
            change = movement.change_quantity(),
            "movement reversed"
        );
        Ok(movement)
    }
}

fn single_movement(outcome: CommitOutcome) -> Result<StockMovement, StoreError> {
    outcome
        .movements
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Corrupt("commit returned no movement".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use stockledger_core::{ProductVariantId, StoreId, UserId};
    use stockledger_inventory::{MovementReason, StockKey, StockPolicy};

    fn service(policy: StockPolicy) -> (Arc<LedgerWriter>, StockAdjustmentService) {
        let writer = Arc::new(LedgerWriter::in_memory(policy, "PO-", Arc::new(SystemClock)));
        (writer.clone(), StockAdjustmentService::new(writer))
    }

    fn adjust(key: StockKey, change: i64, reason: MovementReason) -> AdjustStock {
        AdjustStock {
            store_id: key.store_id,
            variant_id: key.variant_id,
            change_quantity: change,
            reason,
            note: None,
            created_by: UserId::new(),
        }
    }

    fn key() -> StockKey {
        StockKey::new(StoreId::new(), ProductVariantId::new())
    }

    #[test]
    fn insufficient_stock_leaves_level_unchanged() {
        let (writer, svc) = service(StockPolicy::default());
        let k = key();
        svc.adjust_stock(adjust(k, 3, MovementReason::InitialStock))
            .unwrap();

        let err = svc
            .adjust_stock(adjust(k, -5, MovementReason::ManualAdjustment))
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Domain(DomainError::InsufficientStock {
                available: 3,
                requested: 5,
                ..
            })
        ));
        assert_eq!(writer.levels().get_level(k.store_id, k.variant_id).unwrap(), 3);
        assert_eq!(writer.ledger().last_sequence().unwrap(), 1);
    }

    #[test]
    fn allow_policy_lets_level_go_negative() {
        let (writer, svc) = service(StockPolicy::allow_negative());
        let k = key();
        svc.adjust_stock(adjust(k, -2, MovementReason::Sale)).unwrap();
        assert_eq!(writer.levels().get_level(k.store_id, k.variant_id).unwrap(), -2);
    }

    #[test]
    fn purchase_receipt_reason_is_reserved() {
        let (_, svc) = service(StockPolicy::default());
        let err = svc
            .adjust_stock(adjust(key(), 4, MovementReason::PurchaseReceipt))
            .unwrap_err();
        assert!(matches!(err, InventoryError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn stock_count_appends_the_difference() {
        let (writer, svc) = service(StockPolicy::default());
        let k = key();
        svc.adjust_stock(adjust(k, 10, MovementReason::InitialStock))
            .unwrap();

        let count = |counted| RecordStockCount {
            store_id: k.store_id,
            variant_id: k.variant_id,
            counted_quantity: counted,
            note: None,
            created_by: UserId::new(),
        };

        let m = svc.record_stock_count(count(7)).unwrap().unwrap();
        assert_eq!(m.change_quantity(), -3);
        assert_eq!(*m.reason(), MovementReason::Correction);
        assert_eq!(writer.levels().get_level(k.store_id, k.variant_id).unwrap(), 7);

        assert!(svc.record_stock_count(count(7)).unwrap().is_none());
        assert_eq!(writer.ledger().last_sequence().unwrap(), 2);
    }

    #[test]
    fn reversal_offsets_once() {
        let (writer, svc) = service(StockPolicy::default());
        let k = key();
        let original = svc
            .adjust_stock(adjust(k, 6, MovementReason::Return))
            .unwrap();

        let reverse = || ReverseMovement {
            movement_id: original.id(),
            note: None,
            created_by: UserId::new(),
        };
        let reversal = svc.reverse_movement(reverse()).unwrap();
        assert_eq!(reversal.change_quantity(), -6);
        assert_eq!(reversal.reverses(), Some(original.id()));
        assert_eq!(writer.levels().get_level(k.store_id, k.variant_id).unwrap(), 0);

        let err = svc.reverse_movement(reverse()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Domain(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn reversing_unknown_movement_is_not_found() {
        let (_, svc) = service(StockPolicy::default());
        let err = svc
            .reverse_movement(ReverseMovement {
                movement_id: stockledger_core::MovementId::new(),
                note: None,
                created_by: UserId::new(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Domain(DomainError::NotFound {
                entity: "stock_movement",
                ..
            })
        ));
    }
}
