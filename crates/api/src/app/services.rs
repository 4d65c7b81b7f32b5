use std::sync::Arc;

use tracing::{info, warn};

use stockledger_infra::{
    Clock, InventorySnapshot, LedgerConfig, LedgerWriter, PurchaseOrderManager,
    ReconciliationWorker, StockAdjustmentService, StoreError, WorkerHandle,
};

use crate::app::queries::InventoryQueryApi;

/// Infra wiring: one ledger writer shared by the write services and the read façade.
///
/// State lives in memory; with `journal_path` configured every commit is also journaled
/// and replayed on the next start.
#[derive(Debug)]
pub struct AppServices {
    pub config: LedgerConfig,
    pub clock: Arc<dyn Clock>,
    pub writer: Arc<LedgerWriter>,
    pub purchase_orders: PurchaseOrderManager,
    pub adjustments: StockAdjustmentService,
    pub queries: InventoryQueryApi,
}

impl AppServices {
    /// Empty state, or whatever the configured journal holds.
    pub fn build(config: LedgerConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let writer = match &config.journal_path {
            Some(path) => LedgerWriter::open_journaled(
                path,
                config.stock_policy(),
                &config.po_prefix,
                clock.clone(),
            )?,
            None => LedgerWriter::in_memory(config.stock_policy(), &config.po_prefix, clock.clone()),
        };
        info!(
            negative_stock = ?config.negative_stock,
            backorder_stores = config.backorder_stores.len(),
            max_retries = config.max_retries,
            po_prefix = %config.po_prefix,
            journal = ?config.journal_path,
            "inventory services wired"
        );
        Ok(Self::wire(config, clock, Arc::new(writer)))
    }

    /// State restored from a snapshot. The PO number prefix travels with the snapshot.
    ///
    /// A configured journal is restarted with the snapshot as its baseline.
    pub fn from_snapshot(
        snapshot: InventorySnapshot,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if snapshot.purchase_orders.po_prefix != config.po_prefix {
            warn!(
                snapshot_prefix = %snapshot.purchase_orders.po_prefix,
                configured_prefix = %config.po_prefix,
                "snapshot PO prefix differs from configuration; keeping the snapshot's"
            );
        }
        let mut writer = snapshot.restore(config.stock_policy(), clock.clone())?;
        if let Some(path) = &config.journal_path {
            writer = writer.with_journal(path)?;
        }
        Ok(Self::wire(config, clock, Arc::new(writer)))
    }

    fn wire(config: LedgerConfig, clock: Arc<dyn Clock>, writer: Arc<LedgerWriter>) -> Self {
        Self {
            purchase_orders: PurchaseOrderManager::new(writer.clone(), clock.clone())
                .with_max_retries(config.max_retries),
            adjustments: StockAdjustmentService::new(writer.clone())
                .with_max_retries(config.max_retries),
            queries: InventoryQueryApi::new(writer.clone()),
            config,
            clock,
            writer,
        }
    }

    /// Start the background reconciliation worker when an interval is configured.
    pub fn spawn_reconciliation(&self) -> std::io::Result<Option<WorkerHandle>> {
        let Some(interval) = self.config.reconcile_interval() else {
            info!("reconciliation worker disabled");
            return Ok(None);
        };
        let handle =
            ReconciliationWorker::spawn("stock-reconciliation", self.writer.clone(), interval)?;
        info!(interval_secs = interval.as_secs(), "reconciliation worker started");
        Ok(Some(handle))
    }
}
