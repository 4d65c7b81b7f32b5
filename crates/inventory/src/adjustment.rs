//! Ad-hoc (non purchase order) stock changes.
//!
//! Each command plans the movement it would append given the current level. Planning is
//! pure; the ledger writer re-checks the stock policy against the authoritative level at
//! commit time.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, MovementId, ProductVariantId, StoreId, UserId};

use crate::level::StockKey;
use crate::movement::{MovementReason, NewMovement, StockMovement};
use crate::policy::StockPolicy;

/// Command: AdjustStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub store_id: StoreId,
    pub variant_id: ProductVariantId,
    pub change_quantity: i64,
    pub reason: MovementReason,
    pub note: Option<String>,
    pub created_by: UserId,
}

impl AdjustStock {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.store_id, self.variant_id)
    }

    pub fn plan(&self, current: i64, policy: &StockPolicy) -> DomainResult<NewMovement> {
        if self.reason == MovementReason::PurchaseReceipt {
            return Err(DomainError::validation(
                "PURCHASE_RECEIPT is reserved for receiving against a purchase order",
            ));
        }

        let movement = NewMovement::new(
            self.store_id,
            self.variant_id,
            self.change_quantity,
            self.reason.clone(),
            self.created_by,
        )
        .with_note(self.note.clone());
        movement.validate()?;

        policy.check(self.key(), current, self.change_quantity)?;
        Ok(movement)
    }
}

/// Command: RecordStockCount (physical count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStockCount {
    pub store_id: StoreId,
    pub variant_id: ProductVariantId,
    pub counted_quantity: i64,
    pub note: Option<String>,
    pub created_by: UserId,
}

impl RecordStockCount {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.store_id, self.variant_id)
    }

    /// `None` when the count already matches the level.
    pub fn plan(&self, current: i64) -> DomainResult<Option<NewMovement>> {
        if self.counted_quantity < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }

        let delta = self
            .counted_quantity
            .checked_sub(current)
            .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;
        if delta == 0 {
            return Ok(None);
        }

        let note = self
            .note
            .clone()
            .or_else(|| Some(format!("stock count: {current} -> {}", self.counted_quantity)));
        let movement = NewMovement::new(
            self.store_id,
            self.variant_id,
            delta,
            MovementReason::Correction,
            self.created_by,
        )
        .with_note(note);
        movement.validate()?;
        Ok(Some(movement))
    }
}

/// Command: ReverseMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseMovement {
    pub movement_id: MovementId,
    pub note: Option<String>,
    pub created_by: UserId,
}

impl ReverseMovement {
    /// Plan the offsetting correction for `original`.
    ///
    /// `already_reversed` reports whether the ledger holds a movement reversing `original`.
    pub fn plan(
        &self,
        original: &StockMovement,
        already_reversed: bool,
        current: i64,
        policy: &StockPolicy,
    ) -> DomainResult<NewMovement> {
        if original.id() != self.movement_id {
            return Err(DomainError::invariant("movement_id mismatch"));
        }
        if *original.reason() == MovementReason::PurchaseReceipt {
            return Err(DomainError::validation(
                "purchase receipts cannot be reversed; adjust stock instead",
            ));
        }
        if original.reverses().is_some() {
            return Err(DomainError::invariant(format!(
                "movement {} is itself a reversal",
                original.id()
            )));
        }
        if already_reversed {
            return Err(DomainError::invariant(format!(
                "movement {} has already been reversed",
                original.id()
            )));
        }

        let delta = original
            .change_quantity()
            .checked_neg()
            .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;
        let note = self
            .note
            .clone()
            .or_else(|| Some(format!("reversal of movement {}", original.id())));

        let mut movement = NewMovement::new(
            original.store_id(),
            original.variant_id(),
            delta,
            MovementReason::Correction,
            self.created_by,
        )
        .with_note(note);
        movement.reverses = Some(original.id());
        movement.validate()?;

        policy.check(original.key(), current, delta)?;
        Ok(movement)
    }
}
