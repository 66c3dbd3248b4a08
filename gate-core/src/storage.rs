//! Durable storage using RocksDB
//!
//! # Column Families
//!
//! - `ledger` - Append-only audit ledger (key: big-endian seq, value: JSON entry)
//! - `replay` - Copy of the anti-replay counter (key: `last_applied_event_id`)
//!
//! Every write goes through the WAL with `sync` set, so a record is on disk
//! before the call returns. The counter only ever moves together with the
//! `STATE_ACCEPT` entry that justifies it, in one atomic batch.
//!
//! The authoritative counter is the [`CounterFile`] beside the store. It is
//! written before the batch, so a failure in between burns the id (the event
//! is denied) but can never reopen it.

use crate::{
    counter::{CounterFile, CounterRecord},
    error::{Error, Result},
    types::{EntryKind, LedgerEntry, Record, GENESIS_HASH},
    Config,
};
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Column family names
const CF_LEDGER: &str = "ledger";
const CF_REPLAY: &str = "replay";

/// Key of the single counter record
const COUNTER_KEY: &[u8] = b"last_applied_event_id";

/// Position the next append continues from
#[derive(Debug, Clone)]
struct ChainHead {
    next_seq: u64,
    last_hash: String,
}

impl ChainHead {
    fn genesis() -> Self {
        Self {
            next_seq: 0,
            last_hash: GENESIS_HASH.to_string(),
        }
    }
}

/// Ledger export taken from one snapshot
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    /// Decoded entries
    pub entries: Vec<LedgerEntry>,
    /// JSON Lines bytes, one stored entry per line
    pub bytes: Vec<u8>,
}

/// Ledger + counter store
pub struct LedgerStore {
    db: Arc<DB>,
    head: Mutex<ChainHead>,
    path: PathBuf,
    counter: CounterFile,
    reinitialized: bool,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("path", &self.path)
            .field("counter", &self.counter.path())
            .field("reinitialized", &self.reinitialized)
            .finish()
    }
}

impl LedgerStore {
    /// Open or create the store
    ///
    /// A store that cannot be opened or whose tail cannot be decoded is moved
    /// aside and replaced by an empty one. A store locked by another process
    /// is an error.
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.data_dir.clone();
        let counter = CounterFile::new(config.counter_path()?);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::open_existing(&path, config) {
            Ok((db, head)) => {
                tracing::info!(
                    path = %path.display(),
                    entries = head.next_seq,
                    "Opened ledger store"
                );
                Ok(Self {
                    db: Arc::new(db),
                    head: Mutex::new(head),
                    path,
                    counter,
                    reinitialized: false,
                })
            }
            Err(e) if is_lock_conflict(&e) => {
                tracing::error!(path = %path.display(), error = %e, "Ledger store held by another process");
                Err(e)
            }
            Err(e) => {
                let quarantine = Self::quarantine(&path)?;
                tracing::error!(
                    path = %path.display(),
                    moved_to = ?quarantine,
                    error = %e,
                    "Ledger store unreadable, starting empty"
                );
                let db = Self::open_db(&path, config)?;
                Ok(Self {
                    db: Arc::new(db),
                    head: Mutex::new(ChainHead::genesis()),
                    path,
                    counter,
                    reinitialized: true,
                })
            }
        }
    }

    fn open_existing(path: &Path, config: &Config) -> Result<(DB, ChainHead)> {
        let db = Self::open_db(path, config)?;
        let head = Self::load_head(&db)?;
        Ok((db, head))
    }

    fn open_db(path: &Path, config: &Config) -> Result<DB> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LEDGER, Self::cf_options_ledger()),
            ColumnFamilyDescriptor::new(CF_REPLAY, Options::default()),
        ];

        Ok(DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?)
    }

    fn cf_options_ledger() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn load_head(db: &DB) -> Result<ChainHead> {
        let cf = db
            .cf_handle(CF_LEDGER)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_LEDGER)))?;

        let mut iter = db.iterator_cf(&cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (_, value) = item?;
                let last: LedgerEntry = serde_json::from_slice(&value)?;
                Ok(ChainHead {
                    next_seq: last.seq + 1,
                    last_hash: last.hash,
                })
            }
            None => Ok(ChainHead::genesis()),
        }
    }

    fn quarantine(path: &Path) -> Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let target = PathBuf::from(format!(
            "{}.unreadable-{}",
            path.display(),
            Utc::now().timestamp()
        ));
        std::fs::rename(path, &target)?;
        Ok(Some(target))
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn sync_writes() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    /// Whether the store was replaced by an empty one at open
    pub fn was_reinitialized(&self) -> bool {
        self.reinitialized
    }

    /// Number of entries appended so far
    pub fn len(&self) -> u64 {
        self.head.lock().next_seq
    }

    /// Whether the ledger has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Ledger operations

    /// Append one record; durable when this returns
    pub fn append(&self, record: Record) -> Result<LedgerEntry> {
        let mut head = self.head.lock();
        let entry = LedgerEntry::seal(head.next_seq, record, Utc::now(), head.last_hash.clone())?;
        let value = serde_json::to_vec(&entry)?;

        let cf = self.cf(CF_LEDGER)?;
        self.db
            .put_cf_opt(&cf, entry.seq.to_be_bytes(), &value, &Self::sync_writes())?;

        head.next_seq += 1;
        head.last_hash = entry.hash.clone();

        tracing::debug!(seq = entry.seq, kind = ?entry.kind, "Ledger entry appended");
        Ok(entry)
    }

    /// Append a `STATE_ACCEPT` record and advance the counter atomically
    pub fn commit_accept(&self, record: Record, event_id: u64) -> Result<LedgerEntry> {
        if record.kind != EntryKind::StateAccept {
            return Err(Error::Persistence(format!(
                "counter can only move with STATE_ACCEPT, got {:?}",
                record.kind
            )));
        }

        let mut head = self.head.lock();
        let entry = LedgerEntry::seal(head.next_seq, record, Utc::now(), head.last_hash.clone())?;
        let entry_value = serde_json::to_vec(&entry)?;
        let counter_value = serde_json::to_vec(&CounterRecord {
            last_applied_event_id: event_id,
        })?;

        self.counter.store(event_id)?;

        let cf_ledger = self.cf(CF_LEDGER)?;
        let cf_replay = self.cf(CF_REPLAY)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_ledger, entry.seq.to_be_bytes(), &entry_value);
        batch.put_cf(&cf_replay, COUNTER_KEY, &counter_value);

        self.db
            .write_opt(batch, &Self::sync_writes())
            .map_err(|e| Error::Persistence(e.to_string()))?;

        head.next_seq += 1;
        head.last_hash = entry.hash.clone();

        tracing::info!(seq = entry.seq, event_id, "Replay counter committed");
        Ok(entry)
    }

    fn snapshot_raw(&self) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(CF_LEDGER)?;
        let snapshot = self.db.snapshot();

        let mut values = Vec::new();
        for item in snapshot.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            values.push(value);
        }
        Ok(values)
    }

    /// All entries in append order
    pub fn read_all(&self) -> Result<Vec<LedgerEntry>> {
        self.snapshot_raw()?
            .iter()
            .map(|v| serde_json::from_slice(v).map_err(Error::from))
            .collect()
    }

    /// Entries and their JSON Lines serialization from one snapshot
    pub fn snapshot(&self) -> Result<ExportSnapshot> {
        let raw = self.snapshot_raw()?;

        let mut entries = Vec::with_capacity(raw.len());
        let mut bytes = Vec::new();
        for value in &raw {
            entries.push(serde_json::from_slice(value)?);
            bytes.extend_from_slice(value);
            bytes.push(b'\n');
        }

        Ok(ExportSnapshot { entries, bytes })
    }

    /// Export the ledger for offline audit and record that it happened
    ///
    /// The returned bytes do not include the `LEDGER_EXPORT` entry itself.
    pub fn export(&self) -> Result<Vec<u8>> {
        let snapshot = self.snapshot()?;
        let digest = hex::encode(Sha256::digest(&snapshot.bytes));

        let record = Record::note(
            EntryKind::LedgerExport,
            json!({
                "entries": snapshot.entries.len(),
                "bytes": snapshot.bytes.len(),
                "sha256": digest,
            }),
        );
        if let Err(e) = self.append(record) {
            tracing::error!(error = %e, "Failed to record ledger export");
        }

        Ok(snapshot.bytes)
    }

    // Counter operations

    /// Load the persisted counter
    ///
    /// The larger of the counter file and the in-store copy. A missing file
    /// is 0 only for a store that was not rebuilt at open; otherwise the
    /// accepted ids are unknown and this is an error.
    pub fn load_counter(&self) -> Result<u64> {
        let in_store = self.load_store_counter()?;
        match self.counter.load()? {
            Some(id) => Ok(id.max(in_store)),
            None if self.reinitialized => Err(Error::Persistence(format!(
                "ledger store was rebuilt and replay counter {} is missing",
                self.counter.path().display()
            ))),
            None => Ok(in_store),
        }
    }

    /// Bring the counter file up to `event_id` if it lags behind
    pub fn sync_counter(&self, event_id: u64) -> Result<()> {
        match self.counter.load()? {
            Some(id) if id >= event_id => Ok(()),
            _ => self.counter.store(event_id),
        }
    }

    fn load_store_counter(&self) -> Result<u64> {
        let cf = self.cf(CF_REPLAY)?;
        match self.db.get_cf(&cf, COUNTER_KEY)? {
            Some(value) => {
                let record: CounterRecord = serde_json::from_slice(&value)?;
                Ok(record.last_applied_event_id)
            }
            None => Ok(0),
        }
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

/// Another process owns the RocksDB lock; never quarantine a live store
fn is_lock_conflict(error: &Error) -> bool {
    match error {
        Error::Storage(msg) => {
            let msg = msg.to_ascii_lowercase();
            msg.contains("lock file") || msg.contains("lock hold")
        }
        _ => false,
    }
}

/// Serialize entries the way the store exports them
pub fn encode_jsonl(entries: &[LedgerEntry]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for entry in entries {
        bytes.extend_from_slice(&serde_json::to_vec(entry)?);
        bytes.push(b'\n');
    }
    Ok(bytes)
}

/// Check seq continuity and every hash link, starting from genesis
pub fn verify_chain(entries: &[LedgerEntry]) -> Result<()> {
    let mut expected_prev = GENESIS_HASH.to_string();

    for (index, entry) in entries.iter().enumerate() {
        let index = index as u64;
        if entry.seq != index {
            return Err(Error::ChainBroken {
                seq: entry.seq,
                detail: format!("expected seq {}", index),
            });
        }
        if entry.prev_hash != expected_prev {
            return Err(Error::ChainBroken {
                seq: entry.seq,
                detail: "prev_hash does not match previous entry".to_string(),
            });
        }
        if entry.compute_hash()? != entry.hash {
            return Err(Error::ChainBroken {
                seq: entry.seq,
                detail: "hash does not match contents".to_string(),
            });
        }
        expected_prev = entry.hash.clone();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControlState;
    use crate::types::Mode;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().join("gate");
        (config, temp_dir)
    }

    fn accept_record(event_id: u64) -> Record {
        ControlState::safe_baseline()
            .accept(event_id, Mode::ExploreSlow, false, None, Utc::now())
            .record
    }

    #[test]
    fn test_open_empty() {
        let (config, _temp) = test_config();
        let store = LedgerStore::open(&config).unwrap();
        assert!(store.is_empty());
        assert!(!store.was_reinitialized());
        assert_eq!(store.load_counter().unwrap(), 0);
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_assigns_seq_and_chains() {
        let (config, _temp) = test_config();
        let store = LedgerStore::open(&config).unwrap();

        let first = store
            .append(Record::note(EntryKind::Boot, json!({})))
            .unwrap();
        let second = store
            .append(Record::note(EntryKind::EventIngest, json!({"bytes": 2})))
            .unwrap();

        assert_eq!(first.seq, 0);
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.seq, 1);
        assert_eq!(second.prev_hash, first.hash);

        let entries = store.read_all().unwrap();
        assert_eq!(entries, vec![first, second]);
        assert!(verify_chain(&entries).is_ok());
    }

    #[test]
    fn test_commit_accept_moves_counter() {
        let (config, _temp) = test_config();
        let store = LedgerStore::open(&config).unwrap();

        store.commit_accept(accept_record(7), 7).unwrap();
        assert_eq!(store.load_counter().unwrap(), 7);

        let entries = store.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::StateAccept);
    }

    #[test]
    fn test_commit_accept_rejects_other_kinds() {
        let (config, _temp) = test_config();
        let store = LedgerStore::open(&config).unwrap();

        let result = store.commit_accept(Record::note(EntryKind::ExecStep, json!({})), 3);
        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(store.load_counter().unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_reopen_continues_chain() {
        let (config, _temp) = test_config();
        let last_hash = {
            let store = LedgerStore::open(&config).unwrap();
            store.commit_accept(accept_record(2), 2).unwrap();
            let entry = store
                .append(Record::note(EntryKind::ExecStep, json!({})))
                .unwrap();
            store.close().unwrap();
            entry.hash
        };

        let store = LedgerStore::open(&config).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.load_counter().unwrap(), 2);

        let entry = store
            .append(Record::note(EntryKind::Boot, json!({})))
            .unwrap();
        assert_eq!(entry.seq, 2);
        assert_eq!(entry.prev_hash, last_hash);
        assert!(verify_chain(&store.read_all().unwrap()).is_ok());
    }

    #[test]
    fn test_unreadable_store_is_replaced() {
        let (config, temp) = test_config();
        std::fs::write(&config.data_dir, b"not a database").unwrap();

        let store = LedgerStore::open(&config).unwrap();
        assert!(store.was_reinitialized());
        assert!(store.is_empty());
        // Nothing says which ids were accepted before
        assert!(matches!(store.load_counter(), Err(Error::Persistence(_))));
        store.sync_counter(0).unwrap();
        assert_eq!(store.load_counter().unwrap(), 0);

        let moved = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".unreadable-"));
        assert!(moved);
    }

    #[test]
    fn test_counter_survives_replaced_store() {
        let (config, _temp) = test_config();
        {
            let store = LedgerStore::open(&config).unwrap();
            store.commit_accept(accept_record(7), 7).unwrap();
        }
        std::fs::write(config.data_dir.join("CURRENT"), b"garbage").unwrap();

        let store = LedgerStore::open(&config).unwrap();
        assert!(store.was_reinitialized());
        assert!(store.is_empty());
        assert_eq!(store.load_counter().unwrap(), 7);
    }

    #[test]
    fn test_locked_store_is_not_replaced() {
        let (config, _temp) = test_config();
        let first = LedgerStore::open(&config).unwrap();
        first.append(Record::note(EntryKind::Boot, json!({}))).unwrap();

        assert!(LedgerStore::open(&config).is_err());
        assert_eq!(first.read_all().unwrap().len(), 1);
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_export_matches_read_and_is_ledgered() {
        let (config, _temp) = test_config();
        let store = LedgerStore::open(&config).unwrap();
        store.append(Record::note(EntryKind::Boot, json!({}))).unwrap();
        store.commit_accept(accept_record(1), 1).unwrap();

        let read = store.read_all().unwrap();
        let exported = store.export().unwrap();
        assert_eq!(exported, encode_jsonl(&read).unwrap());

        let after = store.read_all().unwrap();
        assert_eq!(after.len(), read.len() + 1);
        let last = after.last().unwrap();
        assert_eq!(last.kind, EntryKind::LedgerExport);
        assert_eq!(last.payload["entries"], 2);
        assert_eq!(last.payload["bytes"], exported.len());
    }

    #[test]
    fn test_verify_chain_detects_tampering() {
        let (config, _temp) = test_config();
        let store = LedgerStore::open(&config).unwrap();
        for _ in 0..3 {
            store
                .append(Record::note(EntryKind::EventIngest, json!({"bytes": 1})))
                .unwrap();
        }

        let mut entries = store.read_all().unwrap();
        entries[1].payload = json!({"bytes": 99});
        match verify_chain(&entries) {
            Err(Error::ChainBroken { seq, .. }) => assert_eq!(seq, 1),
            other => panic!("expected broken chain, got {:?}", other),
        }

        let mut truncated = store.read_all().unwrap();
        truncated.remove(0);
        assert!(verify_chain(&truncated).is_err());
    }
}
