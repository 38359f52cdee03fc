use std::future::Future;

use crate::error::MirrorResult;
use crate::types::ResumeToken;

/// Trait for storing the resume token of the continuous pipeline.
///
/// The token marks the last feed event whose record is durably written to the sink. It is read
/// once when the pipeline starts and overwritten after every successful flush.
///
/// Implementations must make [`CheckpointStore::save`] atomic: a restart must observe either the
/// previous token or the new one, never a partial value.
pub trait CheckpointStore {
    /// Returns the persisted token, or [`None`] if nothing was persisted yet.
    fn load(&self) -> impl Future<Output = MirrorResult<Option<ResumeToken>>> + Send;

    /// Durably persists `token`, replacing any previous value.
    fn save(&self, token: &ResumeToken) -> impl Future<Output = MirrorResult<()>> + Send;
}
