//! Background workers (std threads with graceful shutdown).

pub mod reconciliation;

pub use reconciliation::{ReconciliationWorker, WorkerHandle};
