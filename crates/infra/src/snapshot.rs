//! JSON export/import of the full inventory state.
//!
//! A snapshot carries the ledger, the level projection exactly as it was, and the purchase
//! order streams. Import checks the ledger's integrity but restores levels verbatim, so a
//! tampered projection is caught by `verify` rather than silently recomputed.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use stockledger_inventory::{StockLevel, StockMovement, StockPolicy};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::journal::sync_parent;
use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
use crate::projections::StockLevelProjector;
use crate::purchase_orders::{
    InMemoryPurchaseOrderRepository, PurchaseOrderExport, PurchaseOrderRepository,
};
use crate::writer::LedgerWriter;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot format version {found}")]
    UnsupportedVersion { found: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub last_sequence: u64,
    pub movements: Vec<StockMovement>,
    pub levels: Vec<StockLevel>,
    pub purchase_orders: PurchaseOrderExport,
}

impl InventorySnapshot {
    /// Capture the writer's state at a single commit boundary.
    pub fn capture<L, R>(writer: &LedgerWriter<L, R>, clock: &dyn Clock) -> Result<Self, StoreError>
    where
        L: LedgerStore,
        R: PurchaseOrderRepository,
    {
        let state = writer.export_state()?;
        Ok(Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            exported_at: clock.now(),
            last_sequence: state.movements.last().map_or(0, StockMovement::sequence),
            movements: state.movements,
            levels: state.levels,
            purchase_orders: state.purchase_orders,
        })
    }

    pub fn write_to(&self, writer: impl Write) -> Result<(), SnapshotError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn read_from(reader: impl Read) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_reader(reader)?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.format_version,
            });
        }
        Ok(snapshot)
    }

    /// Write to `path` via a sibling temp file and rename, so readers never see a partial file.
    /// The temp file is synced before the rename and the directory after it.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let tmp = path.with_extension("json.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            self.write_to(&mut out)?;
            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        sync_parent(path)?;
        info!(
            path = %path.display(),
            movements = self.movements.len(),
            orders = self.purchase_orders.events.len(),
            "snapshot saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let snapshot = Self::read_from(BufReader::new(File::open(path)?))?;
        info!(
            path = %path.display(),
            movements = snapshot.movements.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Rebuild in-memory stores from the snapshot.
    pub fn restore(
        self,
        policy: StockPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<LedgerWriter<InMemoryLedgerStore, InMemoryPurchaseOrderRepository>, StoreError> {
        let actual_last = self.movements.last().map_or(0, StockMovement::sequence);
        if actual_last != self.last_sequence {
            return Err(StoreError::Corrupt(format!(
                "snapshot declares last sequence {} but holds movements up to {actual_last}",
                self.last_sequence
            )));
        }
        if let Some(level) = self.levels.iter().find(|l| l.last_sequence() > actual_last) {
            return Err(StoreError::Corrupt(format!(
                "level {} references sequence {} beyond the ledger",
                level.key(),
                level.last_sequence()
            )));
        }

        let ledger = InMemoryLedgerStore::from_movements(self.movements, clock)?;
        let levels = StockLevelProjector::from_levels(self.levels)?;
        let orders = InMemoryPurchaseOrderRepository::from_export(self.purchase_orders)?;

        Ok(LedgerWriter::new(
            Arc::new(ledger),
            Arc::new(levels),
            Arc::new(orders),
            policy,
        ))
    }
}
