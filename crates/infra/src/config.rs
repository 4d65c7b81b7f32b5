//! Configuration loading and representation.
//!
//! Everything is read from `STOCKLEDGER_*` environment variables with safe defaults.
//! Parsing goes through a lookup function so tests never touch the process environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::StoreId;
use stockledger_inventory::{NegativeStockPolicy, StockPolicy};

pub const ENV_NEGATIVE_STOCK: &str = "STOCKLEDGER_NEGATIVE_STOCK";
pub const ENV_BACKORDER_STORES: &str = "STOCKLEDGER_BACKORDER_STORES";
pub const ENV_MAX_RETRIES: &str = "STOCKLEDGER_MAX_RETRIES";
pub const ENV_PO_PREFIX: &str = "STOCKLEDGER_PO_PREFIX";
pub const ENV_RECONCILE_INTERVAL_SECS: &str = "STOCKLEDGER_RECONCILE_INTERVAL_SECS";
pub const ENV_JOURNAL_PATH: &str = "STOCKLEDGER_JOURNAL_PATH";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PO_PREFIX: &str = "PO-";
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub negative_stock: NegativeStockPolicy,
    pub backorder_stores: Vec<StoreId>,
    /// Conflict retries after the first attempt.
    pub max_retries: u32,
    pub po_prefix: String,
    /// `0` disables the reconciliation worker.
    pub reconcile_interval_secs: u64,
    /// Commit journal location; `None` keeps state in memory only.
    pub journal_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            negative_stock: NegativeStockPolicy::Reject,
            backorder_stores: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            po_prefix: DEFAULT_PO_PREFIX.to_string(),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            journal_path: None,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = value(ENV_NEGATIVE_STOCK) {
            config.negative_stock = match raw.to_ascii_lowercase().as_str() {
                "reject" => NegativeStockPolicy::Reject,
                "allow" => NegativeStockPolicy::Allow,
                other => {
                    return Err(ConfigError::invalid(
                        ENV_NEGATIVE_STOCK,
                        format!("expected 'reject' or 'allow', got '{other}'"),
                    ));
                }
            };
        }

        if let Some(raw) = value(ENV_BACKORDER_STORES) {
            config.backorder_stores = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<StoreId>()
                        .map_err(|e| ConfigError::invalid(ENV_BACKORDER_STORES, e.to_string()))
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(raw) = value(ENV_MAX_RETRIES) {
            config.max_retries = raw
                .parse()
                .map_err(|e| ConfigError::invalid(ENV_MAX_RETRIES, format!("{e}")))?;
        }

        if let Some(raw) = value(ENV_PO_PREFIX) {
            if raw.chars().any(char::is_whitespace) {
                return Err(ConfigError::invalid(
                    ENV_PO_PREFIX,
                    "prefix cannot contain whitespace",
                ));
            }
            config.po_prefix = raw;
        }

        if let Some(raw) = value(ENV_RECONCILE_INTERVAL_SECS) {
            config.reconcile_interval_secs = raw
                .parse()
                .map_err(|e| ConfigError::invalid(ENV_RECONCILE_INTERVAL_SECS, format!("{e}")))?;
        }

        if let Some(raw) = value(ENV_JOURNAL_PATH) {
            config.journal_path = match raw.to_ascii_lowercase().as_str() {
                "off" | "none" => None,
                _ => Some(PathBuf::from(raw)),
            };
        }

        Ok(config)
    }

    pub fn stock_policy(&self) -> StockPolicy {
        self.backorder_stores
            .iter()
            .fold(StockPolicy::new(self.negative_stock), |policy, store| {
                policy.with_backorder_store(*store)
            })
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0)
            .then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}
