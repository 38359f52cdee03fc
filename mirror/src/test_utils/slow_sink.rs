use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::error::MirrorResult;
use crate::sink::{InsertOutcome, Sink};
use crate::types::AnonymizedRecord;

/// Sink wrapper holding every bulk insert for a fixed delay.
///
/// Unlike [`crate::test_utils::test_sink_wrapper::TestSinkWrapper`] it takes no lock around the
/// wrapped call, so inserts running at the same time are observed as such.
#[derive(Debug, Clone)]
pub struct SlowSink<K> {
    sink: K,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    /// Start and end instants of every insert, in completion order.
    inserts: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl<K> SlowSink<K> {
    pub fn wrap(sink: K, delay: Duration) -> Self {
        Self {
            sink,
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            inserts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the largest number of inserts that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Returns the start and end instants of the completed inserts, ordered by start.
    pub async fn inserts(&self) -> Vec<(Instant, Instant)> {
        let mut inserts = self.inserts.lock().await.clone();
        inserts.sort_by_key(|(started_at, _)| *started_at);

        inserts
    }
}

impl<K> Sink for SlowSink<K>
where
    K: Sink + Send + Sync,
{
    fn name() -> &'static str {
        K::name()
    }

    async fn insert_many(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<InsertOutcome> {
        let started_at = Instant::now();
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        sleep(self.delay).await;
        let result = self.sink.insert_many(records).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inserts.lock().await.push((started_at, Instant::now()));

        result
    }

    async fn upsert(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<usize> {
        self.sink.upsert(records).await
    }

    async fn shutdown(&self) -> MirrorResult<()> {
        self.sink.shutdown().await
    }
}
