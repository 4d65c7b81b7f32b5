//! Commit boundary for every write.
//!
//! The `LedgerWriter` is the only component that mutates state. A commit runs under one
//! commit lock and performs, in order:
//!
//! ```text
//! WriteBatch
//!   ↓
//! 1. Level version checks (compare-and-swap on the levels a decision was based on)
//!   ↓
//! 2. Stock policy check against the authoritative levels
//!   ↓
//! 3. Purchase order version check
//!   ↓
//! 4. Ledger append (validates every entry; all-or-nothing), journaled and synced
//!    before the movements become visible
//!   ↓
//! 5. Projector deltas (one per appended movement)
//!   ↓
//! 6. Purchase order save
//! ```
//!
//! Every check that can reject a batch runs before step 4, so a rejected batch leaves no
//! trace. Reads never take the commit lock.
//!
//! With a [`CommitJournal`] attached, [`LedgerWriter::open_journaled`] rebuilds the same
//! state after a restart by replaying the journaled commits.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use tracing::{info, warn};

use stockledger_core::{DomainError, ExpectedVersion, PurchaseOrderId};
use stockledger_inventory::{NewMovement, StockKey, StockLevel, StockMovement, StockPolicy};
use stockledger_purchasing::{PurchaseOrder, PurchaseOrderEvent};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::journal::{CommitJournal, JournalRecord};
use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
use crate::projections::{LevelScope, RebuildReport, StockLevelProjector};
use crate::purchase_orders::{
    InMemoryPurchaseOrderRepository, PurchaseOrderExport, PurchaseOrderRepository,
    RecordedPurchaseOrderEvent,
};

/// Purchase order events to save, with the version they were decided against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChange {
    pub order_id: PurchaseOrderId,
    pub expected: ExpectedVersion,
    pub events: Vec<PurchaseOrderEvent>,
}

/// Level version a decision was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelExpectation {
    pub key: StockKey,
    pub expected: ExpectedVersion,
}

/// Everything one business operation writes, applied as a single commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub movements: Vec<NewMovement>,
    pub level_expectations: Vec<LevelExpectation>,
    pub order: Option<OrderChange>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_movement(mut self, movement: NewMovement) -> Self {
        self.movements.push(movement);
        self
    }

    pub fn with_movements(mut self, movements: impl IntoIterator<Item = NewMovement>) -> Self {
        self.movements.extend(movements);
        self
    }

    /// Require the level at `key` to still be at `version` when the batch commits.
    pub fn expect_level(mut self, key: StockKey, version: u64) -> Self {
        self.level_expectations.push(LevelExpectation {
            key,
            expected: ExpectedVersion::at(version),
        });
        self
    }

    pub fn with_order_change(
        mut self,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
        events: Vec<PurchaseOrderEvent>,
    ) -> Self {
        self.order = Some(OrderChange {
            order_id,
            expected,
            events,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty() && self.order.as_ref().is_none_or(|o| o.events.is_empty())
    }
}

/// What a commit produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub movements: Vec<StockMovement>,
    pub order: Option<PurchaseOrder>,
}

/// Full state captured consistently under the commit lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedState {
    pub movements: Vec<StockMovement>,
    pub levels: Vec<StockLevel>,
    pub purchase_orders: PurchaseOrderExport,
}

/// Single commit boundary over the ledger, the level projection and the PO repository.
#[derive(Debug)]
pub struct LedgerWriter<L = InMemoryLedgerStore, R = InMemoryPurchaseOrderRepository> {
    ledger: Arc<L>,
    levels: Arc<StockLevelProjector>,
    orders: Arc<R>,
    policy: StockPolicy,
    journal: Option<CommitJournal>,
    commit_lock: Mutex<()>,
}

impl LedgerWriter<InMemoryLedgerStore, InMemoryPurchaseOrderRepository> {
    /// Empty in-memory state.
    pub fn in_memory(policy: StockPolicy, po_prefix: &str, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(InMemoryLedgerStore::with_clock(clock)),
            Arc::new(StockLevelProjector::new()),
            Arc::new(InMemoryPurchaseOrderRepository::new(po_prefix)),
            policy,
        )
    }

    /// State replayed from the journal at `path`, which keeps recording every commit.
    ///
    /// A missing file starts empty. Levels are recomputed from the replayed ledger.
    pub fn open_journaled(
        path: impl Into<PathBuf>,
        policy: StockPolicy,
        po_prefix: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let (journal, records) = CommitJournal::open(path)?;
        let replayed = records.len();

        let mut movements = Vec::new();
        let mut orders = PurchaseOrderExport {
            po_prefix: po_prefix.to_string(),
            next_number: 1,
            events: Vec::new(),
        };
        let mut versions: HashMap<PurchaseOrderId, u64> = HashMap::new();

        for record in records {
            match record {
                JournalRecord::Baseline {
                    movements: baseline,
                    purchase_orders,
                } => {
                    for e in &purchase_orders.events {
                        let v = versions.entry(e.order_id).or_default();
                        *v = (*v).max(e.sequence);
                    }
                    movements = baseline;
                    orders = purchase_orders;
                }
                JournalRecord::Commit {
                    movements: mut batch,
                    order,
                } => {
                    movements.append(&mut batch);
                    let Some(change) = order else { continue };
                    let version = versions.entry(change.order_id).or_default();
                    change.expected.check(*version).map_err(|e| {
                        StoreError::Corrupt(format!(
                            "journaled change to purchase order {}: {e}",
                            change.order_id
                        ))
                    })?;
                    for event in change.events {
                        *version += 1;
                        orders
                            .events
                            .push(RecordedPurchaseOrderEvent::new(*version, event));
                    }
                }
            }
        }

        let ledger = InMemoryLedgerStore::from_movements(movements, clock)?;
        // Same deltas the live commits applied, so level versions come back unchanged.
        let levels = StockLevelProjector::new();
        for m in ledger.export()? {
            levels.apply_delta(m.key(), m.change_quantity(), m.sequence())?;
        }

        let writer = Self::new(
            Arc::new(ledger),
            Arc::new(levels),
            Arc::new(InMemoryPurchaseOrderRepository::from_export(orders)?),
            policy,
        );
        info!(
            path = %journal.path().display(),
            records = replayed,
            last_sequence = writer.ledger.last_sequence()?,
            "state replayed from journal"
        );

        Ok(Self {
            journal: Some(journal),
            ..writer
        })
    }
}

impl<L, R> LedgerWriter<L, R>
where
    L: LedgerStore,
    R: PurchaseOrderRepository,
{
    pub fn new(
        ledger: Arc<L>,
        levels: Arc<StockLevelProjector>,
        orders: Arc<R>,
        policy: StockPolicy,
    ) -> Self {
        Self {
            ledger,
            levels,
            orders,
            policy,
            journal: None,
            commit_lock: Mutex::new(()),
        }
    }

    /// Start a fresh journal at `path` whose baseline is the current state. Anything
    /// already at `path` is replaced.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let journal = {
            let _guard = self.lock()?;
            CommitJournal::create(path, self.ledger.export()?, self.orders.export()?)?
        };
        info!(path = %journal.path().display(), "journal attached");
        self.journal = Some(journal);
        Ok(self)
    }

    pub fn journal(&self) -> Option<&CommitJournal> {
        self.journal.as_ref()
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn levels(&self) -> &Arc<StockLevelProjector> {
        &self.levels
    }

    pub fn orders(&self) -> &Arc<R> {
        &self.orders
    }

    pub fn policy(&self) -> &StockPolicy {
        &self.policy
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.commit_lock
            .lock()
            .map_err(|_| StoreError::Poisoned("commit lock"))
    }

    /// Apply a batch atomically.
    pub fn commit(&self, batch: WriteBatch) -> Result<CommitOutcome, StoreError> {
        if batch.is_empty() {
            return Ok(CommitOutcome::default());
        }

        let _guard = self.lock()?;

        for exp in &batch.level_expectations {
            let level = self.levels.level_or_empty(exp.key)?;
            exp.expected.check(level.version()).map_err(|e| {
                StoreError::Conflict(format!("stock level {}: {e}", exp.key))
            })?;
        }

        let mut running: BTreeMap<StockKey, i64> = BTreeMap::new();
        for m in &batch.movements {
            let key = m.key();
            let available = match running.get(&key) {
                Some(q) => *q,
                None => self.levels.get_level(key.store_id, key.variant_id)?,
            };
            let resulting = self.policy.check(key, available, m.change_quantity)?;
            running.insert(key, resulting);
        }

        if let Some(change) = &batch.order {
            let current = self.orders.version(change.order_id)?;
            change.expected.check(current).map_err(|e| {
                StoreError::Conflict(format!("purchase order {}: {e}", change.order_id))
            })?;
            if change.events.iter().any(|e| e.order_id() != change.order_id) {
                return Err(DomainError::invariant(format!(
                    "batch carries events for an order other than {}",
                    change.order_id
                ))
                .into());
            }
        }

        let journal = self.journal.as_ref();
        let committed = self.ledger.append_with(batch.movements, &mut |staged| match journal {
            Some(journal) => journal.append(&JournalRecord::Commit {
                movements: staged.to_vec(),
                order: batch.order.clone(),
            }),
            None => Ok(()),
        })?;
        for m in &committed {
            self.levels
                .apply_delta(m.key(), m.change_quantity(), m.sequence())?;
        }

        let order = match batch.order {
            Some(change) if !change.events.is_empty() => Some(
                self.orders
                    .save(change.order_id, change.expected, &change.events)
                    .inspect_err(|err| {
                        if !committed.is_empty() {
                            warn!(
                                order_id = %change.order_id,
                                error = %err,
                                movements = committed.len(),
                                "purchase order save failed after ledger append"
                            );
                        }
                    })?,
            ),
            _ => None,
        };

        info!(
            movements = committed.len(),
            last_sequence = committed.last().map(StockMovement::sequence),
            order_id = ?order.as_ref().map(PurchaseOrder::id_typed),
            "commit applied"
        );

        Ok(CommitOutcome {
            movements: committed,
            order,
        })
    }

    /// Recompute the scoped levels from the ledger under the commit lock.
    pub fn rebuild(&self, scope: LevelScope) -> Result<RebuildReport, StoreError> {
        let _guard = self.lock()?;
        let report = self.levels.rebuild(self.ledger.as_ref(), scope)?;
        info!(
            scanned = report.scanned,
            drifts = report.drifts.len(),
            rewritten = report.rewritten,
            "stock levels rebuilt"
        );
        Ok(report)
    }

    /// Fail with a consistency error on the first level that disagrees with the ledger.
    pub fn verify(&self, scope: LevelScope) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        self.levels.verify(self.ledger.as_ref(), scope)
    }

    /// Rewrite the journal as one baseline of the current state. No-op without a journal.
    pub fn compact_journal(&self) -> Result<(), StoreError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let _guard = self.lock()?;
        journal.reset(self.ledger.export()?, self.orders.export()?)
    }

    /// Capture ledger, levels and orders at one commit boundary.
    pub fn export_state(&self) -> Result<ExportedState, StoreError> {
        let _guard = self.lock()?;
        Ok(ExportedState {
            movements: self.ledger.export()?,
            levels: self.levels.all()?,
            purchase_orders: self.orders.export()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use stockledger_core::{ProductVariantId, StoreId, UserId};
    use stockledger_inventory::MovementReason;

    fn writer(policy: StockPolicy) -> LedgerWriter {
        LedgerWriter::in_memory(policy, "PO-", Arc::new(SystemClock))
    }

    fn movement(key: StockKey, change: i64) -> NewMovement {
        NewMovement::new(
            key.store_id,
            key.variant_id,
            change,
            MovementReason::ManualAdjustment,
            UserId::new(),
        )
    }

    fn key() -> StockKey {
        StockKey::new(StoreId::new(), ProductVariantId::new())
    }

    #[test]
    fn commit_appends_and_projects() {
        let w = writer(StockPolicy::default());
        let k = key();
        let outcome = w
            .commit(WriteBatch::new().with_movements([movement(k, 5), movement(k, -2)]))
            .unwrap();

        assert_eq!(outcome.movements.len(), 2);
        assert_eq!(w.levels().get_level(k.store_id, k.variant_id).unwrap(), 3);
        assert_eq!(w.levels().level(k).unwrap().unwrap().last_sequence(), 2);
        assert!(w.verify(LevelScope::all()).is_ok());
    }

    #[test]
    fn policy_is_checked_against_running_level_within_a_batch() {
        let w = writer(StockPolicy::default());
        let k = key();
        let err = w
            .commit(WriteBatch::new().with_movements([movement(k, 2), movement(k, -3)]))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Rejected(DomainError::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            })
        ));
        assert_eq!(w.ledger().last_sequence().unwrap(), 0);
        assert_eq!(w.levels().get_level(k.store_id, k.variant_id).unwrap(), 0);
    }

    #[test]
    fn stale_level_version_is_a_conflict() {
        let w = writer(StockPolicy::default());
        let k = key();
        w.commit(WriteBatch::new().with_movement(movement(k, 1)))
            .unwrap();

        let err = w
            .commit(
                WriteBatch::new()
                    .with_movement(movement(k, 1))
                    .expect_level(k, 0),
            )
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(w.levels().get_level(k.store_id, k.variant_id).unwrap(), 1);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let w = writer(StockPolicy::default());
        assert_eq!(w.commit(WriteBatch::new()).unwrap(), CommitOutcome::default());
    }
}
