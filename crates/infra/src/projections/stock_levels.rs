use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::error;

use stockledger_core::{DomainError, ProductVariantId, StoreId};
use stockledger_inventory::{LedgerTotal, StockKey, StockLevel};

use crate::error::StoreError;
use crate::ledger_store::{LedgerStore, MovementFilter};

/// Which levels a rebuild/verify covers. Empty scope = everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelScope {
    pub store_id: Option<StoreId>,
    pub variant_id: Option<ProductVariantId>,
}

impl LevelScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn store(store_id: StoreId) -> Self {
        Self {
            store_id: Some(store_id),
            variant_id: None,
        }
    }

    pub fn key(key: StockKey) -> Self {
        Self {
            store_id: Some(key.store_id),
            variant_id: Some(key.variant_id),
        }
    }

    pub fn contains(&self, key: &StockKey) -> bool {
        self.store_id.is_none_or(|s| key.store_id == s)
            && self.variant_id.is_none_or(|v| key.variant_id == v)
    }

    pub fn to_filter(self) -> MovementFilter {
        MovementFilter {
            store_id: self.store_id,
            variant_id: self.variant_id,
            ..MovementFilter::default()
        }
    }
}

/// A level that disagrees with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDrift {
    pub key: StockKey,
    pub ledger_quantity: i64,
    pub projected_quantity: i64,
}

impl LevelDrift {
    pub fn to_error(self) -> DomainError {
        DomainError::Consistency {
            store_id: self.key.store_id,
            variant_id: self.key.variant_id,
            ledger_quantity: self.ledger_quantity,
            projected_quantity: self.projected_quantity,
        }
    }
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Keys compared.
    pub scanned: usize,
    /// Levels whose quantity disagreed with the ledger before the rebuild.
    pub drifts: Vec<LevelDrift>,
    /// Levels rewritten (drifted quantity or stale `last_sequence`).
    pub rewritten: usize,
}

impl RebuildReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }
}

/// Stock level projection: current quantity per (store, variant).
///
/// A cache over the ledger. Deltas are applied only by the ledger writer, inside the
/// commit, once per appended movement. Levels are disposable and rebuildable from the
/// ledger at any time.
#[derive(Debug, Default)]
pub struct StockLevelProjector {
    levels: RwLock<BTreeMap<StockKey, StockLevel>>,
}

impl StockLevelProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore levels exactly as exported. They are not checked against any ledger here;
    /// run `verify` for that.
    pub fn from_levels(levels: Vec<StockLevel>) -> Result<Self, StoreError> {
        let mut map = BTreeMap::new();
        for level in levels {
            if map.insert(level.key(), level.clone()).is_some() {
                return Err(StoreError::Corrupt(format!(
                    "duplicate stock level for {}",
                    level.key()
                )));
            }
        }
        Ok(Self {
            levels: RwLock::new(map),
        })
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<StockKey, StockLevel>>, StoreError> {
        self.levels.read().map_err(|_| StoreError::Poisoned("stock levels"))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<StockKey, StockLevel>>, StoreError> {
        self.levels
            .write()
            .map_err(|_| StoreError::Poisoned("stock levels"))
    }

    /// Current quantity; 0 when never stocked.
    pub fn get_level(&self, store_id: StoreId, variant_id: ProductVariantId) -> Result<i64, StoreError> {
        Ok(self
            .read()?
            .get(&StockKey::new(store_id, variant_id))
            .map(StockLevel::quantity)
            .unwrap_or(0))
    }

    pub fn level(&self, key: StockKey) -> Result<Option<StockLevel>, StoreError> {
        Ok(self.read()?.get(&key).cloned())
    }

    /// Level for `key`, or an empty one (quantity 0, version 0).
    pub fn level_or_empty(&self, key: StockKey) -> Result<StockLevel, StoreError> {
        Ok(self.level(key)?.unwrap_or_else(|| StockLevel::empty(key)))
    }

    /// Levels of one store, sorted by variant id.
    pub fn list_by_store(&self, store_id: StoreId) -> Result<Vec<StockLevel>, StoreError> {
        Ok(self
            .read()?
            .range(store_range(store_id))
            .map(|(_, level)| level.clone())
            .collect())
    }

    /// Every level, sorted by (store, variant).
    pub fn all(&self) -> Result<Vec<StockLevel>, StoreError> {
        Ok(self.read()?.values().cloned().collect())
    }

    pub fn stores(&self) -> Result<Vec<StoreId>, StoreError> {
        Ok(self
            .read()?
            .keys()
            .map(|k| k.store_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    pub(crate) fn apply_delta(&self, key: StockKey, delta: i64, sequence: u64) -> Result<(), StoreError> {
        self.write()?
            .entry(key)
            .or_insert_with(|| StockLevel::empty(key))
            .apply_delta(delta, sequence);
        Ok(())
    }

    /// Compare projected levels in `scope` with ledger totals.
    pub fn drift(
        &self,
        totals: &BTreeMap<StockKey, LedgerTotal>,
        scope: LevelScope,
    ) -> Result<(usize, Vec<LevelDrift>), StoreError> {
        let levels = self.read()?;
        let keys: BTreeSet<StockKey> = totals
            .keys()
            .chain(levels.keys())
            .filter(|k| scope.contains(k))
            .copied()
            .collect();

        let drifts = keys
            .iter()
            .filter_map(|key| {
                let ledger_quantity = totals.get(key).map(|t| t.quantity).unwrap_or(0);
                let projected_quantity = levels.get(key).map(StockLevel::quantity).unwrap_or(0);
                (ledger_quantity != projected_quantity).then_some(LevelDrift {
                    key: *key,
                    ledger_quantity,
                    projected_quantity,
                })
            })
            .collect();
        Ok((keys.len(), drifts))
    }

    /// Recompute the scoped levels from the ledger and overwrite the projection.
    ///
    /// Must run under the commit lock. Idempotent: a second rebuild with no writes in
    /// between changes nothing, versions included.
    pub(crate) fn rebuild<L: LedgerStore + ?Sized>(
        &self,
        ledger: &L,
        scope: LevelScope,
    ) -> Result<RebuildReport, StoreError> {
        let totals = ledger.totals(&scope.to_filter())?;
        let (scanned, drifts) = self.drift(&totals, scope)?;

        for d in &drifts {
            error!(
                store_id = %d.key.store_id,
                variant_id = %d.key.variant_id,
                ledger_quantity = d.ledger_quantity,
                projected_quantity = d.projected_quantity,
                "stock level drift detected; restating from ledger"
            );
        }

        let mut levels = self.write()?;
        let keys: Vec<StockKey> = totals
            .keys()
            .chain(levels.keys())
            .filter(|k| scope.contains(k))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut rewritten = 0;
        for key in keys {
            let total = totals.get(&key).copied().unwrap_or_default();
            if levels
                .entry(key)
                .or_insert_with(|| StockLevel::empty(key))
                .restate(total)
            {
                rewritten += 1;
            }
        }

        Ok(RebuildReport {
            scanned,
            drifts,
            rewritten,
        })
    }

    /// Same comparison as `rebuild`, without writing. Fails on the first mismatch.
    pub(crate) fn verify<L: LedgerStore + ?Sized>(
        &self,
        ledger: &L,
        scope: LevelScope,
    ) -> Result<(), StoreError> {
        let totals = ledger.totals(&scope.to_filter())?;
        let (_, drifts) = self.drift(&totals, scope)?;
        match drifts.first() {
            None => Ok(()),
            Some(d) => {
                error!(
                    store_id = %d.key.store_id,
                    variant_id = %d.key.variant_id,
                    ledger_quantity = d.ledger_quantity,
                    projected_quantity = d.projected_quantity,
                    "stock level does not match ledger"
                );
                Err(StoreError::Rejected(d.to_error()))
            }
        }
    }
}

fn store_range(store_id: StoreId) -> std::ops::RangeInclusive<StockKey> {
    let lo = StockKey::new(store_id, ProductVariantId::from_uuid(uuid::Uuid::nil()));
    let hi = StockKey::new(store_id, ProductVariantId::from_uuid(uuid::Uuid::from_u128(u128::MAX)));
    lo..=hi
}
