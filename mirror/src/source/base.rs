use futures::stream::BoxStream;
use std::future::Future;

use crate::error::MirrorResult;
use crate::types::{InsertEvent, Record, ResumeToken};

/// Stream of insert events produced by a [`Source`] subscription.
///
/// Dropping the stream ends the subscription.
pub type InsertEventStream = BoxStream<'static, MirrorResult<InsertEvent>>;

/// Stream of records produced by a [`Source`] scan.
pub type RecordStream = BoxStream<'static, MirrorResult<Record>>;

/// Trait for stores holding the customer records to mirror.
///
/// A source exposes two views of the same collection. The insert feed delivers creation events
/// in source order, each carrying a [`ResumeToken`] that can later be handed back to
/// [`Source::subscribe`] to continue right after that event. The scan returns every record,
/// ordered by creation time with the identity breaking ties.
///
/// Updates and deletes are never surfaced.
pub trait Source {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Subscribes to the insert feed.
    ///
    /// With `after`, the feed starts with the first event following that token. Without it, the
    /// feed starts at the current tail and only delivers records inserted from now on. The
    /// subscription is established once the returned future completes, so records inserted
    /// afterwards are guaranteed to be delivered.
    fn subscribe(
        &self,
        after: Option<ResumeToken>,
    ) -> impl Future<Output = MirrorResult<InsertEventStream>> + Send;

    /// Scans all records ordered by creation time ascending.
    fn scan(&self) -> impl Future<Output = MirrorResult<RecordStream>> + Send;

    /// Releases the resources held by the source.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&self) -> impl Future<Output = MirrorResult<()>> + Send {
        async { Ok(()) }
    }
}
