use std::future::Future;

use crate::error::MirrorResult;
use crate::types::{AnonymizedRecord, RecordId};

/// Result of an unordered bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Number of records newly written.
    pub inserted: usize,
    /// Identities that were already present in the sink and were left untouched.
    pub duplicates: Vec<RecordId>,
}

/// Trait for stores receiving anonymized records.
///
/// Sinks only accept [`AnonymizedRecord`]s, so they can never be handed real PII. Records are
/// keyed by identity: two records with the same identity are the same record.
pub trait Sink {
    /// Returns the name of the sink.
    fn name() -> &'static str;

    /// Inserts records in any order, skipping identities already present.
    ///
    /// Conflicts on identity are expected after a crash replayed part of the feed and are
    /// reported in the [`InsertOutcome`], never as errors. Any other failure is returned as an
    /// error and leaves it unspecified which records were written.
    fn insert_many(
        &self,
        records: Vec<AnonymizedRecord>,
    ) -> impl Future<Output = MirrorResult<InsertOutcome>> + Send;

    /// Inserts records, replacing those whose identity is already present.
    ///
    /// Returns the number of records written.
    fn upsert(
        &self,
        records: Vec<AnonymizedRecord>,
    ) -> impl Future<Output = MirrorResult<usize>> + Send;

    /// Releases the resources held by the sink.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&self) -> impl Future<Output = MirrorResult<()>> + Send {
        async { Ok(()) }
    }
}
