use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

/// Human readable purchase order number (e.g. `PO-000042`).
///
/// Distinct from the internal [`stockledger_core::PurchaseOrderId`]; generated by the
/// repository from a monotonic sequence and never reused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoNumber(String);

impl PoNumber {
    /// Zero-padded to six digits; longer sequences simply widen.
    pub fn format(prefix: &str, sequence: u64) -> Self {
        Self(format!("{prefix}{sequence:06}"))
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("po_number cannot be blank"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Numeric suffix, if the number carries `prefix`.
    pub fn sequence(&self, prefix: &str) -> Option<u64> {
        self.0.strip_prefix(prefix)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Display for PoNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_padding_and_recovers_sequence() {
        let number = PoNumber::format("PO-", 42);
        assert_eq!(number.as_str(), "PO-000042");
        assert_eq!(number.sequence("PO-"), Some(42));
        assert_eq!(number.sequence("INV-"), None);

        assert_eq!(PoNumber::format("PO-", 1_234_567).as_str(), "PO-1234567");
    }
}
