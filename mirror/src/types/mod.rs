//! Core data types flowing through the mirror.

mod event;
mod record;
mod token;

pub use event::{InsertEvent, PendingItem};
pub use record::{Address, AnonymizedRecord, Record, RecordId, RecordIdGenerator};
pub use token::ResumeToken;

/// Identifier of a running pipeline, attached to logs and metrics.
pub type PipelineId = u64;
