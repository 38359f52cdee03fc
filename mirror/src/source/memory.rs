use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::mirror_error;
use crate::source::{InsertEventStream, RecordStream, Source};
use crate::types::{InsertEvent, Record, ResumeToken};

/// Number of decimal digits of a position token.
const TOKEN_WIDTH: usize = 20;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    /// Messages of injected feed failures, in injection order.
    feed_failures: Vec<String>,
    closed: bool,
    shutdown_called: bool,
}

/// In-memory append-only source for testing and development.
///
/// Records are kept in insertion order. The feed position of the `n`-th inserted record is `n`,
/// encoded as a zero padded decimal token, and [`MemorySource::origin_token`] is the position
/// right before the first record.
#[derive(Debug, Clone)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
    changes: Arc<watch::Sender<u64>>,
}

impl MemorySource {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);

        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            changes: Arc::new(changes),
        }
    }

    /// Token denoting the position before the first insert.
    pub fn origin_token() -> ResumeToken {
        position_token(0)
    }

    /// Appends a record and returns the token of its insert event.
    pub async fn insert(&self, record: Record) -> ResumeToken {
        let token = {
            let mut inner = self.inner.lock().await;
            inner.records.push(record);
            position_token(inner.records.len())
        };
        self.notify();

        token
    }

    /// Appends records in order and returns the token of the last insert event.
    pub async fn insert_many(&self, records: Vec<Record>) -> ResumeToken {
        let token = {
            let mut inner = self.inner.lock().await;
            inner.records.extend(records);
            position_token(inner.records.len())
        };
        self.notify();

        token
    }

    /// Makes every live subscription yield a [`ErrorKind::SourceIoError`] on its next poll.
    ///
    /// Subscriptions created afterwards are not affected.
    pub async fn fail_feed(&self, message: impl Into<String>) {
        self.inner.lock().await.feed_failures.push(message.into());
        self.notify();
    }

    /// Ends every live and future subscription once it delivered the records inserted so far.
    pub async fn close_feed(&self) {
        self.inner.lock().await.closed = true;
        self.notify();
    }

    /// Returns the position encoded in a token of this source.
    pub fn position_of(token: &ResumeToken) -> MirrorResult<usize> {
        let position = token.as_str().parse::<usize>().map_err(|err| {
            mirror_error!(
                ErrorKind::InvalidResumeToken,
                "Resume token is not a memory source position",
                token,
                source: err
            )
        })?;

        Ok(position)
    }

    pub async fn records(&self) -> Vec<Record> {
        self.inner.lock().await.records.clone()
    }

    pub async fn shutdown_called(&self) -> bool {
        self.inner.lock().await.shutdown_called
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscription {
    inner: Arc<Mutex<Inner>>,
    changes: watch::Receiver<u64>,
    /// Number of records already delivered, which is also the position of the last one.
    position: usize,
    feed_failures_seen: usize,
    failed: bool,
}

impl Subscription {
    async fn next_event(mut self) -> Option<(MirrorResult<InsertEvent>, Self)> {
        if self.failed {
            return None;
        }

        loop {
            {
                let inner = self.inner.lock().await;

                if let Some(message) = inner.feed_failures.get(self.feed_failures_seen) {
                    let err = mirror_error!(
                        ErrorKind::SourceIoError,
                        "Memory source feed was interrupted",
                        message
                    );
                    drop(inner);
                    self.failed = true;
                    return Some((Err(err), self));
                }

                if let Some(record) = inner.records.get(self.position) {
                    let record = record.clone();
                    drop(inner);
                    self.position += 1;
                    let event = InsertEvent {
                        record,
                        token: position_token(self.position),
                    };
                    return Some((Ok(event), self));
                }

                if inner.closed {
                    return None;
                }
            }

            // The sender lives as long as any source clone does.
            if self.changes.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Source for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    async fn subscribe(&self, after: Option<ResumeToken>) -> MirrorResult<InsertEventStream> {
        let changes = self.changes.subscribe();
        let inner = self.inner.lock().await;

        let position = match after {
            Some(token) => {
                let position = Self::position_of(&token)?;
                if position > inner.records.len() {
                    bail!(
                        ErrorKind::InvalidResumeToken,
                        "Resume token is ahead of the memory source",
                        format!("position {position}, {} records", inner.records.len())
                    );
                }
                position
            }
            None => inner.records.len(),
        };

        info!(position, "subscribed to memory source feed");

        let subscription = Subscription {
            inner: self.inner.clone(),
            changes,
            position,
            feed_failures_seen: inner.feed_failures.len(),
            failed: false,
        };

        Ok(stream::unfold(subscription, Subscription::next_event).boxed())
    }

    async fn scan(&self) -> MirrorResult<RecordStream> {
        let mut records = self.inner.lock().await.records.clone();
        records.sort_by_key(|record| (record.created_at, record.id));

        Ok(stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn shutdown(&self) -> MirrorResult<()> {
        self.inner.lock().await.shutdown_called = true;

        Ok(())
    }
}

fn position_token(position: usize) -> ResumeToken {
    ResumeToken::from_source(format!("{position:0width$}", width = TOKEN_WIDTH))
}
