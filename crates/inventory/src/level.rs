use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{ProductVariantId, StoreId};

use crate::movement::StockMovement;

/// Projection key: one level per (store, variant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub store_id: StoreId,
    pub variant_id: ProductVariantId,
}

impl StockKey {
    pub fn new(store_id: StoreId, variant_id: ProductVariantId) -> Self {
        Self {
            store_id,
            variant_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.store_id, self.variant_id)
    }
}

/// Materialized current quantity for one key.
///
/// A cache over the ledger, never authoritative. `version` increases on every change
/// so writers can compare-and-swap against the level they based a decision on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    key: StockKey,
    quantity: i64,
    version: u64,
    /// Ledger sequence of the last movement folded into `quantity` (0 = none).
    last_sequence: u64,
}

impl StockLevel {
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            quantity: 0,
            version: 0,
            last_sequence: 0,
        }
    }

    /// Restore a level exactly as it was exported (snapshot import).
    pub fn restore(key: StockKey, quantity: i64, version: u64, last_sequence: u64) -> Self {
        Self {
            key,
            quantity,
            version,
            last_sequence,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn store_id(&self) -> StoreId {
        self.key.store_id
    }

    pub fn variant_id(&self) -> ProductVariantId {
        self.key.variant_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Fold one appended movement into the level.
    pub fn apply_delta(&mut self, delta: i64, sequence: u64) {
        self.quantity += delta;
        self.last_sequence = self.last_sequence.max(sequence);
        self.version += 1;
    }

    /// Overwrite with a value recomputed from the ledger.
    ///
    /// Returns `true` when the level changed. Unchanged levels keep their version, which
    /// makes repeated rebuilds idempotent.
    pub fn restate(&mut self, total: LedgerTotal) -> bool {
        if self.quantity == total.quantity && self.last_sequence == total.last_sequence {
            return false;
        }
        self.quantity = total.quantity;
        self.last_sequence = total.last_sequence;
        self.version += 1;
        true
    }
}

/// Sum of the ledger for one key.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotal {
    pub quantity: i64,
    pub last_sequence: u64,
    pub movement_count: u64,
}

impl LedgerTotal {
    pub fn add(&mut self, movement: &StockMovement) {
        self.quantity += movement.change_quantity();
        self.last_sequence = self.last_sequence.max(movement.sequence());
        self.movement_count += 1;
    }
}

/// Fold movements into per-key totals. Order-independent.
pub fn fold_movements<'a>(
    movements: impl IntoIterator<Item = &'a StockMovement>,
) -> BTreeMap<StockKey, LedgerTotal> {
    let mut totals: BTreeMap<StockKey, LedgerTotal> = BTreeMap::new();
    for movement in movements {
        totals.entry(movement.key()).or_default().add(movement);
    }
    totals
}
