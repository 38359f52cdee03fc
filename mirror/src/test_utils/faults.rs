//! Wrappers making checkpoint stores and sinks fail on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::bail;
use crate::checkpoint::CheckpointStore;
use crate::error::{ErrorKind, MirrorResult};
use crate::sink::{InsertOutcome, Sink};
use crate::types::{AnonymizedRecord, ResumeToken};

/// Decrements `remaining` if it is positive and returns whether it was.
fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok()
}

/// Checkpoint store failing a configurable number of saves.
#[derive(Debug, Clone)]
pub struct FaultInjectingCheckpointStore<C> {
    store: C,
    failing_saves: Arc<AtomicU32>,
    failed_saves: Arc<AtomicU64>,
}

impl<C> FaultInjectingCheckpointStore<C> {
    pub fn wrap(store: C) -> Self {
        Self {
            store,
            failing_saves: Arc::new(AtomicU32::new(0)),
            failed_saves: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Makes the next `count` saves fail without reaching the wrapped store.
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Returns how many saves failed so far.
    pub fn failed_saves(&self) -> u64 {
        self.failed_saves.load(Ordering::SeqCst)
    }
}

impl<C> CheckpointStore for FaultInjectingCheckpointStore<C>
where
    C: CheckpointStore + Send + Sync,
{
    async fn load(&self) -> MirrorResult<Option<ResumeToken>> {
        self.store.load().await
    }

    async fn save(&self, token: &ResumeToken) -> MirrorResult<()> {
        if take_failure(&self.failing_saves) {
            self.failed_saves.fetch_add(1, Ordering::SeqCst);
            bail!(
                ErrorKind::CheckpointSaveFailed,
                "Injected checkpoint save failure",
                token
            );
        }

        self.store.save(token).await
    }
}

/// Sink failing a configurable number of writes.
#[derive(Debug, Clone)]
pub struct FaultInjectingSink<K> {
    sink: K,
    failing_inserts: Arc<AtomicU32>,
    failing_upserts: Arc<AtomicU32>,
    /// Number of upserts left to let through before `failing_upserts` applies.
    upserts_before_failure: Arc<AtomicU32>,
}

impl<K> FaultInjectingSink<K> {
    pub fn wrap(sink: K) -> Self {
        Self {
            sink,
            failing_inserts: Arc::new(AtomicU32::new(0)),
            failing_upserts: Arc::new(AtomicU32::new(0)),
            upserts_before_failure: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Makes the next `count` bulk inserts fail without reaching the wrapped sink.
    pub fn fail_next_inserts(&self, count: u32) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    /// Lets `successful` upserts through, then fails the following `count` ones.
    pub fn fail_upserts_after(&self, successful: u32, count: u32) {
        self.upserts_before_failure
            .store(successful, Ordering::SeqCst);
        self.failing_upserts.store(count, Ordering::SeqCst);
    }
}

impl<K> Sink for FaultInjectingSink<K>
where
    K: Sink + Send + Sync,
{
    fn name() -> &'static str {
        K::name()
    }

    async fn insert_many(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<InsertOutcome> {
        if take_failure(&self.failing_inserts) {
            bail!(
                ErrorKind::SinkWriteFailed,
                "Injected sink insert failure",
                format!("{} records rejected", records.len())
            );
        }

        self.sink.insert_many(records).await
    }

    async fn upsert(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<usize> {
        if !take_failure(&self.upserts_before_failure) && take_failure(&self.failing_upserts) {
            bail!(
                ErrorKind::SinkWriteFailed,
                "Injected sink upsert failure",
                format!("{} records rejected", records.len())
            );
        }

        self.sink.upsert(records).await
    }

    async fn shutdown(&self) -> MirrorResult<()> {
        self.sink.shutdown().await
    }
}
