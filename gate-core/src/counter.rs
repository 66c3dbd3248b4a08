//! Durable replay counter file
//!
//! The counter lives next to the ledger store, not inside it. A store that
//! cannot be opened is quarantined and rebuilt empty; this file never is, so
//! ids accepted before the rebuild stay stale afterwards.
//!
//! Writes go to a temp file in the same directory, are fsynced, renamed over
//! the record, and the directory is fsynced.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persisted anti-replay counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Highest event id ever accepted
    pub last_applied_event_id: u64,
}

/// Counter record on disk
#[derive(Debug, Clone)]
pub struct CounterFile {
    path: PathBuf,
}

impl CounterFile {
    /// Counter stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the record
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record; `None` when it was never written
    ///
    /// A record that exists but cannot be read or decoded is an error, never 0.
    pub fn load(&self) -> Result<Option<u64>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let record: CounterRecord = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Persistence(format!(
                        "replay counter {} unreadable: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                Ok(Some(record.last_applied_event_id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!(
                "replay counter {} unreadable: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Replace the record; durable when this returns
    pub fn store(&self, event_id: u64) -> Result<()> {
        let dir = self.dir();
        let write = || -> std::io::Result<()> {
            let mut temp = NamedTempFile::new_in(dir)?;
            let value = serde_json::to_vec(&CounterRecord {
                last_applied_event_id: event_id,
            })?;
            temp.write_all(&value)?;
            temp.as_file().sync_all()?;
            temp.persist(&self.path).map_err(|e| e.error)?;
            std::fs::File::open(dir)?.sync_all()
        };

        write().map_err(|e| {
            Error::Persistence(format!(
                "replay counter {} not written: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}
