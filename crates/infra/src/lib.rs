//! Infrastructure layer: ledger storage, projections, the commit boundary and services.

pub mod clock;
pub mod config;
pub mod error;
pub mod journal;
pub mod ledger_store;
pub mod projections;
pub mod purchase_orders;
pub mod services;
pub mod snapshot;
pub mod workers;
pub mod writer;


pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, LedgerConfig};
pub use error::{InventoryError, StoreError};
pub use journal::{CommitJournal, JournalRecord};
pub use ledger_store::{
    InMemoryLedgerStore, LedgerStore, MovementFilter, MovementQueryResult, MovementStream,
    Pagination,
};
pub use projections::{LevelDrift, LevelScope, RebuildReport, StockLevelProjector};
pub use purchase_orders::{
    InMemoryPurchaseOrderRepository, PurchaseOrderExport, PurchaseOrderFilter, PurchaseOrderPage,
    PurchaseOrderRepository, RecordedPurchaseOrderEvent,
};
pub use services::{OrderLine, PurchaseOrderManager, ReceiptOutcome, StockAdjustmentService};
pub use snapshot::{InventorySnapshot, SnapshotError, SNAPSHOT_FORMAT_VERSION};
pub use workers::{ReconciliationWorker, WorkerHandle};
pub use writer::{CommitOutcome, ExportedState, LedgerWriter, OrderChange, WriteBatch};
