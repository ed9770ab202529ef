//! Durable, ordered event storage: the single source of truth each entity
//! replays from after a restart (spec §4/§9's "crash and replay" scenario).
//!
//! Keep a record of every event ever applied to an entity, addressed by a
//! flat string key ("account:A1", "saga:s1", ...) so both entity kinds can
//! share one journal implementation. In essence this is the same
//! multi-tiered record-per-key pattern the rest of the crate descended
//! from, generalized from one mutable record per key to an append-only log.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors raised by an `EventJournal` implementation.
#[derive(Error, Debug)]
pub enum JournalError {
    /// The backing `redb` database returned an error.
    #[error(transparent)]
    Db(#[from] redb::DatabaseError),
    /// A `redb` transaction failed.
    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),
    /// A `redb` table operation failed.
    #[error(transparent)]
    Table(#[from] redb::TableError),
    /// A `redb` storage operation failed.
    #[error(transparent)]
    Storage(#[from] redb::StorageError),
    /// A `redb` commit failed.
    #[error(transparent)]
    Commit(#[from] redb::CommitError),
    /// An event failed to serialize or deserialize.
    #[error("event codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Append-only, per-key event log. `append` returns the offset the event
/// was written at; `replay` returns every event at or after `from_offset`,
/// in append order.
pub trait EventJournal<E> {
    /// Durably append `event` under `key`, returning its offset.
    fn append(&self, key: &str, event: &E) -> Result<u64, JournalError>;

    /// Read back every event at or after `from_offset`, in order.
    fn replay(&self, key: &str, from_offset: u64) -> Result<Vec<E>, JournalError>;

    /// A snapshot is just the full replay plus the next free offset; entity
    /// logs in this system are short-lived enough that no implementation
    /// needs to compact — offered so callers don't special-case the journal
    /// kind.
    fn snapshot(&self, key: &str) -> Result<(u64, Vec<E>), JournalError> {
        let events = self.replay(key, 0)?;
        let next_offset = events.len() as u64;
        Ok((next_offset, events))
    }
}

/// An in-process journal backed by a `Mutex<HashMap>`; the default for
/// tests and for the demo CLI's ephemeral mode.
#[derive(Default)]
pub struct InMemoryJournal<E> {
    streams: Mutex<HashMap<String, Vec<E>>>,
}

impl<E> InMemoryJournal<E> {
    /// An empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: Clone> EventJournal<E> for InMemoryJournal<E> {
    fn append(&self, key: &str, event: &E) -> Result<u64, JournalError> {
        let mut streams = self.streams.lock().expect("journal mutex poisoned");
        let stream = streams.entry(key.to_string()).or_default();
        stream.push(event.clone());
        Ok((stream.len() - 1) as u64)
    }

    fn replay(&self, key: &str, from_offset: u64) -> Result<Vec<E>, JournalError> {
        let streams = self.streams.lock().expect("journal mutex poisoned");
        Ok(streams
            .get(key)
            .map(|stream| stream.iter().skip(from_offset as usize).cloned().collect())
            .unwrap_or_default())
    }
}

const EVENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("events");
const OFFSETS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("offsets");

/// Encode `(key, offset)` as a single lexicographically-ordered table key:
/// zero-padded to 20 decimal digits (`u64::MAX` is 20 digits), so a byte-wise
/// range scan over encoded keys visits offsets in numeric order.
fn encode_event_key(key: &str, offset: u64) -> String {
    format!("{key}\u{0}{offset:020}")
}

/// A disk-backed journal using an embedded `redb` database: one ACID,
/// single-file store shared by every entity's stream.
pub struct RedbJournal {
    db: Database,
}

impl RedbJournal {
    /// Open (creating if absent) a `redb` database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let db = Database::create(path)?;
        Ok(Self { db })
    }

    fn next_offset(&self, key: &str) -> Result<u64, JournalError> {
        let read_txn = self.db.begin_read()?;
        match read_txn.open_table(OFFSETS_TABLE) {
            Ok(table) => Ok(table.get(key)?.map(|v| v.value()).unwrap_or(0)),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl<E> EventJournal<E> for RedbJournal
where
    E: Serialize + DeserializeOwned,
{
    fn append(&self, key: &str, event: &E) -> Result<u64, JournalError> {
        let offset = self.next_offset(key)?;
        let payload = serde_json::to_vec(event)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut events = write_txn.open_table(EVENTS_TABLE)?;
            let encoded = encode_event_key(key, offset);
            events.insert(encoded.as_str(), payload.as_slice())?;
            let mut offsets = write_txn.open_table(OFFSETS_TABLE)?;
            offsets.insert(key, offset + 1)?;
        }
        write_txn.commit()?;
        Ok(offset)
    }

    fn replay(&self, key: &str, from_offset: u64) -> Result<Vec<E>, JournalError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(EVENTS_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lo = encode_event_key(key, from_offset);
        let hi = encode_event_key(key, u64::MAX);
        let mut events = Vec::new();
        for entry in table.range(lo.as_str()..=hi.as_str())? {
            let (_, value) = entry?;
            events.push(serde_json::from_slice(value.value())?);
        }
        Ok(events)
    }
}
