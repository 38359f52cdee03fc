use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::MirrorResult;
use crate::sink::{InsertOutcome, Sink};
use crate::types::{AnonymizedRecord, RecordId};

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<RecordId, AnonymizedRecord>,
    shutdown_called: bool,
}

/// In-memory sink for testing and development.
///
/// Records are kept ordered by identity. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all stored records ordered by identity.
    pub async fn records(&self) -> Vec<AnonymizedRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    pub async fn get(&self, id: RecordId) -> Option<AnonymizedRecord> {
        self.inner.lock().await.records.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.records.is_empty()
    }

    pub async fn shutdown_called(&self) -> bool {
        self.inner.lock().await.shutdown_called
    }
}

impl Sink for MemorySink {
    fn name() -> &'static str {
        "memory"
    }

    async fn insert_many(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<InsertOutcome> {
        let mut inner = self.inner.lock().await;

        let mut outcome = InsertOutcome::default();
        for record in records {
            let id = record.id();
            if inner.records.contains_key(&id) {
                outcome.duplicates.push(id);
                continue;
            }

            inner.records.insert(id, record);
            outcome.inserted += 1;
        }

        info!(
            inserted = outcome.inserted,
            duplicates = outcome.duplicates.len(),
            "inserted records into memory sink"
        );

        Ok(outcome)
    }

    async fn upsert(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<usize> {
        let mut inner = self.inner.lock().await;

        let written = records.len();
        for record in records {
            inner.records.insert(record.id(), record);
        }

        Ok(written)
    }

    async fn shutdown(&self) -> MirrorResult<()> {
        self.inner.lock().await.shutdown_called = true;

        Ok(())
    }
}
