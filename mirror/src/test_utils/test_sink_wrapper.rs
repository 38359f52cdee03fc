use std::collections::BTreeSet;
use std::{fmt, sync::Arc};
use tokio::sync::{Notify, RwLock};

use crate::error::MirrorResult;
use crate::sink::{InsertOutcome, Sink};
use crate::test_utils::notify::TimedNotify;
use crate::types::{AnonymizedRecord, RecordId};

type WrittenCondition = Box<dyn Fn(&BTreeSet<RecordId>) -> bool + Send + Sync>;

struct Inner<K> {
    wrapped_sink: K,
    /// Identities passed to every `insert_many` call, in call order.
    insert_calls: Vec<Vec<RecordId>>,
    /// Identities passed to every `upsert` call, in call order.
    upsert_calls: Vec<Vec<RecordId>>,
    /// Identities successfully written by either operation.
    written: BTreeSet<RecordId>,
    tolerated_duplicates: Vec<RecordId>,
    written_conditions: Vec<(WrittenCondition, Arc<Notify>)>,
    shutdown_called: bool,
}

impl<K> Inner<K> {
    fn check_conditions(&mut self) {
        let written = &self.written;
        self.written_conditions.retain(|(condition, notify)| {
            let should_retain = !condition(written);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// Test wrapper for [`Sink`] implementations that tracks all operations.
///
/// The wrapper records every call reaching the sink and lets tests wait until given records
/// were written.
#[derive(Clone)]
pub struct TestSinkWrapper<K> {
    inner: Arc<RwLock<Inner<K>>>,
}

impl<K> fmt::Debug for TestSinkWrapper<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSinkWrapper").finish_non_exhaustive()
    }
}

impl<K> TestSinkWrapper<K> {
    pub fn wrap(sink: K) -> Self {
        let inner = Inner {
            wrapped_sink: sink,
            insert_calls: Vec::new(),
            upsert_calls: Vec::new(),
            written: BTreeSet::new(),
            tolerated_duplicates: Vec::new(),
            written_conditions: Vec::new(),
            shutdown_called: false,
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Returns the identities of every `insert_many` call, including failed ones.
    pub async fn insert_calls(&self) -> Vec<Vec<RecordId>> {
        self.inner.read().await.insert_calls.clone()
    }

    pub async fn upsert_calls(&self) -> Vec<Vec<RecordId>> {
        self.inner.read().await.upsert_calls.clone()
    }

    /// Returns the identities the wrapped sink reported as duplicates.
    pub async fn tolerated_duplicates(&self) -> Vec<RecordId> {
        self.inner.read().await.tolerated_duplicates.clone()
    }

    pub async fn shutdown_called(&self) -> bool {
        self.inner.read().await.shutdown_called
    }

    /// Notifies once at least `count` distinct records were written.
    pub async fn wait_for_records(&self, count: usize) -> TimedNotify {
        self.notify_on_written(move |written| written.len() >= count)
            .await
    }

    /// Notifies once `condition` holds for the set of written identities.
    pub async fn notify_on_written<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&BTreeSet<RecordId>) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner
            .written_conditions
            .push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        TimedNotify::new(notify)
    }
}

impl<K> Sink for TestSinkWrapper<K>
where
    K: Sink + Send + Sync,
{
    fn name() -> &'static str {
        K::name()
    }

    async fn insert_many(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<InsertOutcome> {
        let ids: Vec<RecordId> = records.iter().map(AnonymizedRecord::id).collect();

        let mut inner = self.inner.write().await;
        inner.insert_calls.push(ids.clone());

        let outcome = inner.wrapped_sink.insert_many(records).await?;

        inner
            .tolerated_duplicates
            .extend(outcome.duplicates.iter().copied());
        inner.written.extend(ids);
        inner.check_conditions();

        Ok(outcome)
    }

    async fn upsert(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<usize> {
        let ids: Vec<RecordId> = records.iter().map(AnonymizedRecord::id).collect();

        let mut inner = self.inner.write().await;
        inner.upsert_calls.push(ids.clone());

        let upserted = inner.wrapped_sink.upsert(records).await?;

        inner.written.extend(ids);
        inner.check_conditions();

        Ok(upserted)
    }

    async fn shutdown(&self) -> MirrorResult<()> {
        let mut inner = self.inner.write().await;
        inner.shutdown_called = true;

        inner.wrapped_sink.shutdown().await
    }
}
