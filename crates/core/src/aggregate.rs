//! Versioned state: aggregate traits and the compare-and-swap expectation writers carry.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Identity and version of an event-sourced record.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far; `0` for a record that does not exist yet.
    fn version(&self) -> u64;
}

/// Version a write was decided against.
///
/// Stock levels and purchase orders both count their changes from zero, so a write
/// carries the count it saw and the commit rejects it if anything landed in between.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "version", rename_all = "snake_case")]
pub enum ExpectedVersion {
    /// The record must not exist yet (creation).
    New,
    /// The record must be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for a record last seen at `version`.
    pub fn at(version: u64) -> Self {
        if version == 0 { Self::New } else { Self::Exact(version) }
    }

    pub fn version(self) -> u64 {
        match self {
            Self::New => 0,
            Self::Exact(v) => v,
        }
    }

    pub fn matches(self, actual: u64) -> bool {
        self.version() == actual
    }

    /// `ConcurrentModification` when `actual` moved on.
    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            return Ok(());
        }
        Err(DomainError::conflict(match self {
            Self::New => format!("expected a new record, found version {actual}"),
            Self::Exact(v) => format!("expected version {v}, found {actual}"),
        }))
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::New => f.write_str("new"),
            Self::Exact(v) => write!(f, "v{v}"),
        }
    }
}

/// Command handling over versioned state.
///
/// `handle` decides, `apply` evolves. Neither performs I/O: turning the resulting events
/// into ledger movements and persisting them happens in the commit.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Each applied event bumps the version by one.
    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_versions_are_retryable_conflicts() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn new_only_matches_missing_records() {
        assert!(ExpectedVersion::New.check(0).is_ok());
        assert!(ExpectedVersion::New.check(1).is_err());
        assert_eq!(ExpectedVersion::at(0), ExpectedVersion::New);
        assert_eq!(ExpectedVersion::at(5), ExpectedVersion::Exact(5));
        assert_eq!(ExpectedVersion::at(5).to_string(), "v5");
    }

    #[test]
    fn serializes_with_explicit_kind() {
        let json = serde_json::to_string(&ExpectedVersion::Exact(2)).unwrap();
        assert_eq!(json, r#"{"kind":"exact","version":2}"#);
        let back: ExpectedVersion = serde_json::from_str(r#"{"kind":"new"}"#).unwrap();
        assert_eq!(back, ExpectedVersion::New);
    }
}
