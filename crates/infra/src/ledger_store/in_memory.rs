use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use stockledger_core::{DomainError, MovementId};
use stockledger_inventory::{LedgerTotal, NewMovement, StockKey, StockMovement, fold_movements};

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::ledger_store::query::{MovementFilter, MovementQueryResult, Pagination};
use crate::ledger_store::r#trait::LedgerStore;

#[derive(Debug, Default)]
struct LedgerInner {
    /// Sequence order; `movements[i].sequence() == i + 1`.
    movements: Vec<StockMovement>,
    by_id: HashMap<MovementId, usize>,
    /// Reversed movement id -> index of the reversing movement.
    reversed_by: HashMap<MovementId, usize>,
}

impl LedgerInner {
    fn push(&mut self, movement: StockMovement) {
        let idx = self.movements.len();
        self.by_id.insert(movement.id(), idx);
        if let Some(target) = movement.reverses() {
            self.reversed_by.insert(target, idx);
        }
        self.movements.push(movement);
    }
}

/// In-memory append-only ledger.
///
/// Intended for tests, dev and single-process deployments (with snapshot export for
/// durability). Movements are kept in sequence order, which is also `created_at` order.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    inner: RwLock<LedgerInner>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
            clock,
        }
    }

    /// Rebuild a ledger from exported movements, checking its integrity.
    pub fn from_movements(
        movements: Vec<StockMovement>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let mut inner = LedgerInner::default();
        for (idx, m) in movements.into_iter().enumerate() {
            let expected = idx as u64 + 1;
            if m.sequence() != expected {
                return Err(StoreError::Corrupt(format!(
                    "sequence gap: expected {expected}, found {}",
                    m.sequence()
                )));
            }
            if m.change_quantity() == 0 {
                return Err(StoreError::Corrupt(format!(
                    "movement {} has a zero change",
                    m.id()
                )));
            }
            if inner.by_id.contains_key(&m.id()) {
                return Err(StoreError::Corrupt(format!("duplicate movement id {}", m.id())));
            }
            if let Some(prev) = inner.movements.last() {
                if m.created_at() < prev.created_at() {
                    return Err(StoreError::Corrupt(format!(
                        "movement {} is older than its predecessor",
                        m.id()
                    )));
                }
            }
            if let Some(target) = m.reverses() {
                if !inner.by_id.contains_key(&target) || inner.reversed_by.contains_key(&target) {
                    return Err(StoreError::Corrupt(format!(
                        "movement {} has an invalid reversal target {target}",
                        m.id()
                    )));
                }
            }
            inner.push(m);
        }

        Ok(Self {
            inner: RwLock::new(inner),
            clock,
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerInner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned("ledger"))
    }

    fn validate_batch(inner: &LedgerInner, batch: &[NewMovement]) -> Result<(), StoreError> {
        let mut reversed_in_batch = HashSet::new();
        for (idx, m) in batch.iter().enumerate() {
            m.validate().map_err(|e| match e {
                DomainError::Validation(msg) => {
                    StoreError::Rejected(DomainError::validation(format!("entry {idx}: {msg}")))
                }
                other => StoreError::from(other),
            })?;

            if let Some(target) = m.reverses {
                let original = inner
                    .by_id
                    .get(&target)
                    .map(|i| &inner.movements[*i])
                    .ok_or_else(|| DomainError::not_found("stock_movement", target))?;
                if inner.reversed_by.contains_key(&target) || !reversed_in_batch.insert(target) {
                    return Err(DomainError::invariant(format!(
                        "movement {target} has already been reversed"
                    ))
                    .into());
                }
                if original.key() != m.key() || original.change_quantity() != -m.change_quantity {
                    return Err(DomainError::invariant(format!(
                        "reversal of {target} must offset it exactly"
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append_with(
        &self,
        batch: Vec<NewMovement>,
        persist: &mut dyn FnMut(&[StockMovement]) -> Result<(), StoreError>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::Poisoned("ledger"))?;

        if batch.is_empty() {
            persist(&[])?;
            return Ok(vec![]);
        }

        Self::validate_batch(&inner, &batch)?;

        // created_at never goes backwards, even if the wall clock does.
        let now = self.clock.now();
        let created_at = inner
            .movements
            .last()
            .map(|m| m.created_at().max(now))
            .unwrap_or(now);

        let first = inner.movements.len() as u64 + 1;
        let committed: Vec<StockMovement> = batch
            .into_iter()
            .zip(first..)
            .map(|(new, sequence)| StockMovement::record(new, MovementId::new(), sequence, created_at))
            .collect();

        persist(&committed)?;
        for movement in &committed {
            inner.push(movement.clone());
        }

        Ok(committed)
    }

    fn get(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        let inner = self.read()?;
        Ok(inner.by_id.get(&id).map(|i| inner.movements[*i].clone()))
    }

    fn reversal_of(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        let inner = self.read()?;
        Ok(inner.reversed_by.get(&id).map(|i| inner.movements[*i].clone()))
    }

    fn query(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StoreError> {
        let pagination = pagination.normalized();
        let inner = self.read()?;

        let matches: Vec<&StockMovement> =
            inner.movements.iter().filter(|m| filter.matches(m)).collect();
        let total = matches.len() as u64;
        let (page, has_more) = pagination.page(&matches);

        Ok(MovementQueryResult {
            movements: page.into_iter().cloned().collect(),
            total,
            pagination,
            has_more,
        })
    }

    fn totals(&self, filter: &MovementFilter) -> Result<BTreeMap<StockKey, LedgerTotal>, StoreError> {
        let inner = self.read()?;
        Ok(fold_movements(
            inner.movements.iter().filter(|m| filter.matches(m)),
        ))
    }

    fn last_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.movements.len() as u64)
    }

    fn export(&self) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.read()?.movements.clone())
    }
}
