use crate::types::{AnonymizedRecord, Record, ResumeToken};

/// Creation of a record observed on the source insert feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertEvent {
    /// The inserted record, as stored in the source.
    pub record: Record,
    /// Position of this event in the feed.
    pub token: ResumeToken,
}

/// Anonymized record waiting to be flushed, paired with the position of the event that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    pub record: AnonymizedRecord,
    pub token: ResumeToken,
}
