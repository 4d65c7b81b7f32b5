//! Append-only stock movement ledger.

pub mod in_memory;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use query::{MovementFilter, MovementQueryResult, MovementStream, Pagination};
pub use r#trait::LedgerStore;
