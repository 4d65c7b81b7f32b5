use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::ledger_store::LedgerStore;
use crate::projections::{LevelScope, RebuildReport};
use crate::purchase_orders::PurchaseOrderRepository;
use crate::writer::LedgerWriter;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Periodic reconciliation of stock levels against the ledger.
///
/// - Wakes every `interval` and runs an idempotent full `rebuild`
/// - Drift is logged (and repaired) by the rebuild itself
/// - Stops promptly on shutdown or when the handle is dropped
#[derive(Debug)]
pub struct ReconciliationWorker;

impl ReconciliationWorker {
    pub fn spawn<L, R>(
        name: &'static str,
        writer: Arc<LedgerWriter<L, R>>,
        interval: Duration,
    ) -> std::io::Result<WorkerHandle>
    where
        L: LedgerStore + 'static,
        R: PurchaseOrderRepository + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, &writer, interval, shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// One reconciliation pass.
    pub fn run_once<L, R>(writer: &LedgerWriter<L, R>) -> Result<RebuildReport, StoreError>
    where
        L: LedgerStore,
        R: PurchaseOrderRepository,
    {
        writer.rebuild(LevelScope::all())
    }
}

fn worker_loop<L, R>(
    name: &'static str,
    writer: &LedgerWriter<L, R>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) where
    L: LedgerStore,
    R: PurchaseOrderRepository,
{
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        match ReconciliationWorker::run_once(writer) {
            Ok(report) if report.is_clean() => {
                debug!(worker = name, scanned = report.scanned, "reconciliation clean");
            }
            Ok(report) => {
                warn!(
                    worker = name,
                    drifts = report.drifts.len(),
                    rewritten = report.rewritten,
                    "reconciliation repaired drift"
                );
            }
            Err(err) => {
                error!(worker = name, error = %err, "reconciliation failed");
            }
        }
    }
}
