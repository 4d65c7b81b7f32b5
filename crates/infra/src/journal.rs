//! Append-only commit journal.
//!
//! Every commit is written as one JSON line and synced to disk before the commit becomes
//! visible, so a restart replays exactly the commits callers saw succeed. The first line
//! may be a baseline (the full state at import or compaction time); every other line is a
//! commit.
//!
//! A line only counts once its trailing newline is on disk. An unterminated tail is what a
//! crash mid-write leaves behind and is cut off on open; a complete line that does not
//! parse is corruption.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stockledger_inventory::StockMovement;

use crate::error::StoreError;
use crate::purchase_orders::PurchaseOrderExport;
use crate::writer::OrderChange;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalRecord {
    /// Full state the following commits build on.
    Baseline {
        movements: Vec<StockMovement>,
        purchase_orders: PurchaseOrderExport,
    },
    Commit {
        movements: Vec<StockMovement>,
        order: Option<OrderChange>,
    },
}

#[derive(Debug)]
struct JournalFile {
    file: File,
    /// Bytes known to be durable.
    len: u64,
}

#[derive(Debug)]
pub struct CommitJournal {
    path: PathBuf,
    state: Mutex<JournalFile>,
}

impl CommitJournal {
    /// Open (or create) the journal at `path` and return the records it holds.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, Vec<JournalRecord>), StoreError> {
        let path = path.into();
        let mut file = open_for_append(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| io_error("read", &path, e))?;

        let mut records = Vec::new();
        let mut durable = 0usize;
        while let Some(end) = bytes[durable..].iter().position(|b| *b == b'\n') {
            let line = &bytes[durable..durable + end];
            let line_no = records.len() + 1;
            if !line.is_empty() {
                let record: JournalRecord = serde_json::from_slice(line).map_err(|e| {
                    StoreError::Corrupt(format!(
                        "journal {} line {line_no}: {e}",
                        path.display()
                    ))
                })?;
                if matches!(record, JournalRecord::Baseline { .. }) && !records.is_empty() {
                    return Err(StoreError::Corrupt(format!(
                        "journal {} has a baseline at line {line_no}",
                        path.display()
                    )));
                }
                records.push(record);
            }
            durable += end + 1;
        }

        if durable < bytes.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - durable,
                "discarding unterminated journal tail"
            );
            file.set_len(durable as u64)
                .and_then(|()| file.sync_all())
                .map_err(|e| io_error("truncate", &path, e))?;
        }

        info!(path = %path.display(), records = records.len(), "journal opened");
        let journal = Self {
            path,
            state: Mutex::new(JournalFile {
                file,
                len: durable as u64,
            }),
        };
        Ok((journal, records))
    }

    /// Replace whatever is at `path` with a journal holding only the given baseline.
    pub fn create(
        path: impl Into<PathBuf>,
        movements: Vec<StockMovement>,
        purchase_orders: PurchaseOrderExport,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let (file, len) = write_baseline(&path, movements, purchase_orders)?;
        Ok(Self {
            path,
            state: Mutex::new(JournalFile { file, len }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it. On failure the file is cut back to its last
    /// durable length.
    pub fn append(&self, record: &JournalRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| StoreError::Io(format!("encode journal record: {e}")))?;
        line.push(b'\n');

        let mut guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Poisoned("journal"))?;
        let state = &mut *guard;

        if let Err(err) = state
            .file
            .write_all(&line)
            .and_then(|()| state.file.sync_all())
        {
            if let Err(undo) = state.file.set_len(state.len) {
                warn!(path = %self.path.display(), error = %undo, "journal rollback failed");
            }
            return Err(io_error("append", &self.path, err));
        }

        state.len += line.len() as u64;
        Ok(())
    }

    /// Rewrite the journal as a single baseline.
    pub fn reset(
        &self,
        movements: Vec<StockMovement>,
        purchase_orders: PurchaseOrderExport,
    ) -> Result<(), StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Poisoned("journal"))?;
        let dropped = state.len;
        let (file, len) = write_baseline(&self.path, movements, purchase_orders)?;
        *state = JournalFile { file, len };
        info!(
            path = %self.path.display(),
            before_bytes = dropped,
            after_bytes = len,
            "journal compacted"
        );
        Ok(())
    }

    /// Durable size in bytes.
    pub fn durable_len(&self) -> Result<u64, StoreError> {
        Ok(self
            .state
            .lock()
            .map_err(|_| StoreError::Poisoned("journal"))?
            .len)
    }
}

fn open_for_append(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| io_error("open", path, e))
}

/// Write a baseline-only journal next to `path`, sync it, then swap it in.
fn write_baseline(
    path: &Path,
    movements: Vec<StockMovement>,
    purchase_orders: PurchaseOrderExport,
) -> Result<(File, u64), StoreError> {
    let record = JournalRecord::Baseline {
        movements,
        purchase_orders,
    };
    let mut line = serde_json::to_vec(&record)
        .map_err(|e| StoreError::Io(format!("encode journal baseline: {e}")))?;
    line.push(b'\n');

    let tmp = path.with_extension("journal.tmp");
    {
        let mut out = File::create(&tmp).map_err(|e| io_error("create", &tmp, e))?;
        out.write_all(&line)
            .and_then(|()| out.sync_all())
            .map_err(|e| io_error("write", &tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| io_error("rename", path, e))?;
    sync_parent(path)?;

    Ok((open_for_append(path)?, line.len() as u64))
}

#[cfg(unix)]
pub(crate) fn sync_parent(path: &Path) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| io_error("sync directory", parent, e))
}

#[cfg(not(unix))]
pub(crate) fn sync_parent(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

fn io_error(op: &str, path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io(format!("{op} {}: {err}", path.display()))
}
