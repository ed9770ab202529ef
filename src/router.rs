//! A sharded, addressable entity runtime generalizing the teacher's
//! `Engine`/`Worker`/`WorkerHandle` pool: each entity key hashes to one of a
//! fixed set of workers, each worker owns one OS thread and a private
//! `HashMap` of activated entities, so commands for the same key are always
//! processed in the order they were sent while unrelated keys proceed
//! concurrently (spec §5).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::journal::{EventJournal, JournalError};

const MAILBOX_SIZE: usize = 128;

/// The behavior a `EntityRouter` shards and activates: one value of `Self`
/// per live entity key, reconstructed from its event stream on first touch.
pub trait EntityLogic: Send + 'static {
    /// Commands this entity accepts.
    type Command: Send + 'static;
    /// Events this entity persists; also the journal's record type.
    type Event: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// What a processed command replies with.
    type Reply: Send + 'static;
    /// Construction-time parameters shared by every entity of this kind
    /// (e.g. the account stash bound, or the saga coordinator's clock).
    type Config: Clone + Send + Sync + 'static;

    /// Reconstruct an entity from its full, ordered event stream.
    fn hydrate(key: &str, config: &Self::Config, events: &[Self::Event]) -> Self;

    /// Apply one command, returning the events to persist (possibly more
    /// than one) and the reply to send back to the caller.
    fn apply(&mut self, cmd: Self::Command) -> (Vec<Self::Event>, Self::Reply);
}

/// Errors raised while routing a command to an entity.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The worker's mailbox is gone (it panicked or the router was dropped).
    #[error("worker unreachable")]
    WorkerUnreachable,
    /// The worker died before replying.
    #[error("worker did not reply")]
    NoReply,
    /// Persisting an event failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

enum Work<L: EntityLogic> {
    Command {
        key: String,
        cmd: L::Command,
        reply: SyncSender<L::Reply>,
    },
}

struct WorkerHandle<L: EntityLogic> {
    tx: SyncSender<Work<L>>,
    handle: JoinHandle<()>,
}

/// A pool of `n_workers` threads, each owning a shard of entities keyed by
/// `key`'s hash, backed by a shared journal for durability and replay.
pub struct EntityRouter<L: EntityLogic, J> {
    workers: Vec<WorkerHandle<L>>,
    _journal: std::marker::PhantomData<fn() -> J>,
}

impl<L, J> EntityRouter<L, J>
where
    L: EntityLogic,
    J: EventJournal<L::Event> + Send + Sync + 'static,
{
    /// Spin up `n_workers` worker threads sharing `journal` and `config`.
    #[must_use]
    pub fn new(n_workers: usize, journal: Arc<J>, config: L::Config) -> Self {
        let n_workers = n_workers.max(1);
        let workers = (0..n_workers)
            .map(|_| {
                let (tx, rx) = mpsc::sync_channel(MAILBOX_SIZE);
                let journal = Arc::clone(&journal);
                let config = config.clone();
                let handle = std::thread::spawn(move || Self::run_worker(rx, journal, config));
                WorkerHandle { tx, handle }
            })
            .collect();
        Self {
            workers,
            _journal: std::marker::PhantomData,
        }
    }

    fn run_worker(rx: Receiver<Work<L>>, journal: Arc<J>, config: L::Config) {
        let mut entities: HashMap<String, L> = HashMap::new();
        while let Ok(Work::Command { key, cmd, reply }) = rx.recv() {
            let entity = entities.entry(key.clone()).or_insert_with(|| {
                let events = journal.replay(&key, 0).unwrap_or_default();
                L::hydrate(&key, &config, &events)
            });
            let (events, out) = entity.apply(cmd);
            for event in &events {
                // Persist before the reply is observable, per spec §5; a
                // journal failure here is logged and the command is dropped
                // rather than acknowledged with state that wasn't durable.
                if let Err(err) = journal.append(&key, event) {
                    tracing::error!(%key, error = %err, "failed to persist event, dropping reply");
                    return;
                }
            }
            let _ = reply.send(out);
        }
    }

    fn shard_for(&self, key: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.workers.len()
    }

    /// Send `cmd` to the entity addressed by `key` and block for its reply.
    pub fn send(&self, key: &str, cmd: L::Command) -> Result<L::Reply, RouterError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let worker = &self.workers[self.shard_for(key)];
        worker
            .tx
            .send(Work::Command {
                key: key.to_string(),
                cmd,
                reply: reply_tx,
            })
            .map_err(|_| RouterError::WorkerUnreachable)?;
        reply_rx.recv().map_err(|_| RouterError::NoReply)
    }

    /// Shut down every worker, draining in-flight commands first.
    pub fn shutdown(self) {
        for worker in self.workers {
            drop(worker.tx);
            let _ = worker.handle.join();
        }
    }
}
