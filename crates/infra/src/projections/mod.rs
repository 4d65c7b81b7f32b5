//! Projection implementations (read model builders).
//!
//! Projections fold the ledger into query-optimized read models. They are:
//! - **Rebuildable**: can be reconstructed from the ledger at any time
//! - **Never authoritative**: the ledger wins every disagreement

pub mod stock_levels;

pub use stock_levels::{LevelDrift, LevelScope, RebuildReport, StockLevelProjector};
